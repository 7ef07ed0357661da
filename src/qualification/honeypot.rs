// Sell-ability probe: a tiny real buy followed by selling exactly what it
// returned. Both legs must confirm for the token to count as sellable.

use crate::facade::ContractFacade;
use crate::types::{apply_slippage, TxOutcome};
use alloy::primitives::{Address, U256};
use tracing::{info, warn};

pub async fn probe_sellability<F: ContractFacade + ?Sized>(
    facade: &F,
    token: Address,
    amount_in: U256,
    slippage: f64,
) -> Result<(), String> {
    let wrapped = facade.wrapped_native();

    let quote = facade
        .get_quote(amount_in, vec![wrapped, token])
        .await
        .map_err(|e| format!("buy quote failed: {}", e))?;
    let min_out = apply_slippage(quote.last().copied().unwrap_or(U256::ZERO), slippage);

    let received = match facade.swap_exact_native_for_tokens(token, amount_in, min_out).await {
        TxOutcome::Confirmed { amount_out, .. } if !amount_out.is_zero() => amount_out,
        TxOutcome::Confirmed { tx_hash, .. } => {
            return Err(format!("probe buy {} returned no tokens", tx_hash));
        }
        TxOutcome::Failed { reason } => return Err(format!("probe buy failed: {}", reason)),
    };

    let quote = facade
        .get_quote(received, vec![token, wrapped])
        .await
        .map_err(|e| format!("sell quote failed: {}", e))?;
    let min_out = apply_slippage(quote.last().copied().unwrap_or(U256::ZERO), slippage);

    match facade.swap_exact_tokens_for_native(token, received, min_out).await {
        TxOutcome::Confirmed { tx_hash, .. } => {
            info!("🧪 Sell probe passed for {:#x} ({})", token, tx_hash);
            Ok(())
        }
        TxOutcome::Failed { reason } => {
            warn!("🍯 Sell probe failed for {:#x}: {}", token, reason);
            Err(format!("probe sell failed: {}", reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::mock::{ScriptedFacade, TOKEN, WRAPPED};
    use crate::types::native_to_wei;

    #[tokio::test]
    async fn test_sells_exactly_what_was_bought() {
        let facade = ScriptedFacade::new();
        facade.set_price(Some(0.001));
        probe_sellability(&facade, TOKEN, native_to_wei(0.0005), 0.03).await.unwrap();

        let bought = facade.buys.lock().unwrap()[0].clone();
        let sold = facade.sells.lock().unwrap()[0].clone();
        assert_eq!(bought.amount_in, native_to_wei(0.0005));

        let received = facade.get_quote(bought.amount_in, vec![WRAPPED, TOKEN]).await.unwrap()[1];
        assert!(!received.is_zero());
        assert_eq!(sold.amount_in, received);
    }

    #[tokio::test]
    async fn test_unsellable_token_fails() {
        let facade = ScriptedFacade::new();
        *facade.fail_sells.lock().unwrap() = true;
        let err = probe_sellability(&facade, TOKEN, native_to_wei(0.0005), 0.03).await.unwrap_err();
        assert!(err.contains("TRANSFER_FAILED"));
    }

    #[tokio::test]
    async fn test_failed_buy_fails_probe() {
        let facade = ScriptedFacade::new();
        *facade.fail_buys.lock().unwrap() = true;
        assert!(probe_sellability(&facade, TOKEN, native_to_wei(0.0005), 0.03).await.is_err());
        assert!(facade.sells.lock().unwrap().is_empty());
    }
}
