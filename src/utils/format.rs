/// Decimal places of the TON coin (1 TON = 10^9 nanotons).
pub const TON_DECIMALS: u32 = 9;

/// Render a base-unit amount with `decimals` fractional digits.
///
/// Integer arithmetic only, so large balances keep every digit.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let width = decimals as usize;
    match 10u128.checked_pow(decimals) {
        Some(scale) => format!("{}.{:0width$}", amount / scale, amount % scale),
        // Past 38 decimals every u128 amount is below one whole unit
        None => format!("0.{:0width$}", amount),
    }
}
