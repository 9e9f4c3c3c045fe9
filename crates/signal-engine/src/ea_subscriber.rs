//! Forwards inbound EA messages into the portfolio ledger. Registered with
//! `EaServer` as a `MessageSubscriber`; runs synchronously on the
//! connection's own read task, so it must never block.
use ea_transport::MessageSubscriber;
use portfolio_ledger::PortfolioLedger;
use risk_manager::CircuitBreakerState;
use rust_decimal::prelude::ToPrimitive;
use signal_core::{AccountStatusPayload, CoreError, CoreResult, EaMessage, EaMessageType, TradeResultPayload};
use std::sync::Arc;

pub struct LedgerSubscriber {
    ledger: Arc<PortfolioLedger>,
    circuit_breaker: Arc<CircuitBreakerState>,
}

impl LedgerSubscriber {
    pub fn new(ledger: Arc<PortfolioLedger>, circuit_breaker: Arc<CircuitBreakerState>) -> Self {
        Self { ledger, circuit_breaker }
    }
}

impl MessageSubscriber for LedgerSubscriber {
    fn on_message(&self, message: &EaMessage) -> CoreResult<()> {
        match message.message_type {
            EaMessageType::TradeResult => {
                let payload: TradeResultPayload = serde_json::from_value(message.data.clone())
                    .map_err(|e| CoreError::ShapeError(format!("TRADE_RESULT payload: {e}")))?;
                if let Some(realized_pnl) = self.ledger.apply_trade_result(&payload)? {
                    self.circuit_breaker.record_trade_outcome(realized_pnl.to_f64().unwrap_or(0.0));
                }
                Ok(())
            }
            EaMessageType::AccountStatus => {
                let payload: AccountStatusPayload = serde_json::from_value(message.data.clone())
                    .map_err(|e| CoreError::ShapeError(format!("ACCOUNT_STATUS payload: {e}")))?;
                self.ledger.apply_account_status(&payload);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
