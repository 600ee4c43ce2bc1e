use escrow_ledger_listener::config::ListenerConfig;
use escrow_ledger_listener::ledger::TonApiClient;
use escrow_ledger_listener::listener::{
	self, EventDecoder, EventDispatcher, Supervisor,
	events::{DeadLetterHandler, TracingHandler},
	fetcher::TransactionFetcher,
	reconciler::Reconciler,
	state_persistence::StatePersistenceService,
};
use escrow_ledger_listener::store::{BalanceStore, HistoryStore, InMemoryStore, SupabaseStore};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config = match ListenerConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};

	info!(
		"Starting escrow listener for {} on {:?} via {}",
		config.escrow_address, config.network, config.tonapi_base_url
	);

	let ledger = match TonApiClient::new(
		config.tonapi_base_url.clone(),
		config.tonapi_api_key.clone(),
		config.http_timeout,
	) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			error!("Failed to create TonAPI client: {}", e);
			return;
		}
	};

	let (balances, history): (Arc<dyn BalanceStore>, Arc<dyn HistoryStore>) =
		match &config.supabase {
			Some(supabase) => match SupabaseStore::new(
				supabase.url.clone(),
				supabase.service_role_key.clone(),
				config.http_timeout,
			) {
				Ok(store) => {
					info!("Using Supabase store at {}", supabase.url);
					let store = Arc::new(store);
					(store.clone() as Arc<dyn BalanceStore>, store as Arc<dyn HistoryStore>)
				}
				Err(e) => {
					error!("Failed to create Supabase store: {}", e);
					return;
				}
			},
			None => {
				warn!("SUPABASE_URL not set, reconciling into an in-memory store (dry run)");
				let store = Arc::new(InMemoryStore::new());
				(store.clone() as Arc<dyn BalanceStore>, store as Arc<dyn HistoryStore>)
			}
		};

	let persistence = Arc::new(StatePersistenceService::new(
		config.state_dir.clone(),
		&config.escrow_address,
	));

	let mut dispatcher = EventDispatcher::new();
	dispatcher.register_handler(Box::new(TracingHandler::new(config.escrow_address.clone())));
	if config.dead_letter_enabled {
		info!("Dead letters are recorded in {:?}", config.state_dir);
		dispatcher.register_handler(Box::new(DeadLetterHandler::new(persistence.clone())));
	}
	let sink = Arc::new(dispatcher);

	let supervisor = Supervisor::new(
		TransactionFetcher::new(ledger, config.escrow_address.clone(), config.page_sizes),
		EventDecoder::with_opcodes(config.deposit_opcode, config.withdraw_opcode),
		Reconciler::new(balances, history, sink.clone()),
		persistence,
		sink,
		config.supervisor,
	)
	.await;

	let supervisor = match supervisor {
		Ok(supervisor) => supervisor,
		Err(e) => {
			error!("Failed to restore listener state: {}", e);
			return;
		}
	};

	let handle = listener::spawn(supervisor);
	info!("Listener running, press Ctrl+C to stop");

	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to wait for shutdown signal: {}", e);
	}
	info!("Shutting down listener");
	handle.abort();
}
