//! Single authoritative store of open positions and closed trades. Mutated
//! only by inbound EA `TRADE_RESULT` and `ACCOUNT_STATUS` messages; the
//! signal generator only ever reads from it (risk parameters, equity).
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use signal_core::{
    AccountStatusPayload, ClosedTrade, CoreError, CoreResult, Position, Side, TradeResultPayload,
};
use std::collections::HashMap;
use std::sync::RwLock;

/// What the signal generator knows about a signal it handed to an EA,
/// before the EA's `TRADE_RESULT` confirms a ticket. Registered by the
/// caller at dispatch time so the ledger can open a `Position` on success.
#[derive(Debug, Clone)]
pub struct PendingSignal {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub stop: Option<f64>,
    pub target: Option<f64>,
}

struct LedgerState {
    open_positions: HashMap<i64, Position>,
    closed_trades: Vec<ClosedTrade>,
    pending_signals: HashMap<String, PendingSignal>,
    last_ticket: i64,
    balance: Decimal,
    equity: Decimal,
    margin: Decimal,
    free_margin: Decimal,
    margin_level: Decimal,
}

/// All mutations serialise under a single write lock; reads take a read
/// lock and never block each other. Derived aggregates are recomputed from
/// the primary records on every call, never cached.
pub struct PortfolioLedger {
    state: RwLock<LedgerState>,
}

impl PortfolioLedger {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            state: RwLock::new(LedgerState {
                open_positions: HashMap::new(),
                closed_trades: Vec::new(),
                pending_signals: HashMap::new(),
                last_ticket: 0,
                balance: starting_balance,
                equity: starting_balance,
                margin: Decimal::ZERO,
                free_margin: starting_balance,
                margin_level: Decimal::ZERO,
            }),
        }
    }

    /// Recorded by the caller immediately before dispatching a `SIGNAL` to
    /// an EA, so the matching `TRADE_RESULT` can be turned into a `Position`.
    pub fn register_pending_signal(&self, signal_id: &str, pending: PendingSignal) {
        self.state
            .write()
            .unwrap()
            .pending_signals
            .insert(signal_id.to_string(), pending);
    }

    /// A ticket absent from `open_positions` opens a position (consuming
    /// the matching pending signal); a ticket already open closes it.
    /// Tickets must be unique and strictly increasing across opens.
    ///
    /// Returns the realized PnL of the trade this call closed, or `None`
    /// when the call opened a position or was a failed confirmation — the
    /// caller uses this to feed a circuit breaker's consecutive-loss count.
    pub fn apply_trade_result(&self, payload: &TradeResultPayload) -> CoreResult<Option<Decimal>> {
        let mut state = self.state.write().unwrap();

        if !payload.success {
            state.pending_signals.remove(&payload.signal_id);
            return Ok(None);
        }

        let ticket = payload
            .ticket
            .ok_or_else(|| CoreError::ProtocolViolation("successful TRADE_RESULT missing ticket".into()))?;

        if let Some(position) = state.open_positions.remove(&ticket) {
            let close_price = payload
                .execution_price
                .ok_or_else(|| CoreError::ProtocolViolation("close confirmation missing execution_price".into()))?;
            let diff = match position.side {
                Side::Buy => close_price - position.open_price,
                Side::Sell => position.open_price - close_price,
            };
            let realized_pnl = Decimal::from_f64(diff * position.volume).unwrap_or_default()
                - position.commission
                - position.swap;
            let close_time = payload.execution_time;
            let duration_secs = (close_time - position.open_time).num_seconds();
            state.closed_trades.push(ClosedTrade {
                ticket: position.ticket,
                symbol: position.symbol,
                side: position.side,
                volume: position.volume,
                open_price: position.open_price,
                close_price,
                open_time: position.open_time,
                close_time,
                realized_pnl,
                duration_secs,
            });
            return Ok(Some(realized_pnl));
        }

        if ticket <= state.last_ticket {
            return Err(CoreError::ProtocolViolation(format!(
                "ticket {ticket} is not greater than last seen ticket {}",
                state.last_ticket
            )));
        }

        let pending = state
            .pending_signals
            .remove(&payload.signal_id)
            .ok_or_else(|| CoreError::ProtocolViolation(format!(
                "no pending signal registered for signal_id {}",
                payload.signal_id
            )))?;
        let open_price = payload
            .execution_price
            .ok_or_else(|| CoreError::ProtocolViolation("open confirmation missing execution_price".into()))?;

        state.open_positions.insert(
            ticket,
            Position {
                ticket,
                symbol: pending.symbol,
                side: pending.side,
                volume: pending.volume,
                open_price,
                current_price: open_price,
                stop: pending.stop,
                target: pending.target,
                open_time: payload.execution_time,
                commission: Decimal::ZERO,
                swap: Decimal::ZERO,
            },
        );
        state.last_ticket = ticket;
        Ok(None)
    }

    /// Updates live account aggregates; does not touch individual positions
    /// (the payload carries no per-symbol prices).
    pub fn apply_account_status(&self, payload: &AccountStatusPayload) {
        let mut state = self.state.write().unwrap();
        state.balance = Decimal::from_f64(payload.balance).unwrap_or(state.balance);
        state.equity = Decimal::from_f64(payload.equity).unwrap_or(state.equity);
        state.margin = Decimal::from_f64(payload.margin).unwrap_or(state.margin);
        state.free_margin = Decimal::from_f64(payload.free_margin).unwrap_or(state.free_margin);
        state.margin_level = Decimal::from_f64(payload.margin_level).unwrap_or(state.margin_level);
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.state.read().unwrap().open_positions.values().cloned().collect()
    }

    pub fn closed_trades(&self) -> Vec<ClosedTrade> {
        self.state.read().unwrap().closed_trades.clone()
    }

    pub fn equity(&self) -> Decimal {
        self.state.read().unwrap().equity
    }

    /// Recomputed from the primary records on every call.
    pub fn account_summary(&self, now: DateTime<Utc>) -> signal_core::AccountSummary {
        let state = self.state.read().unwrap();

        let day_start = now - chrono::Duration::days(1);
        let week_start = now - chrono::Duration::weeks(1);
        let month_start = now - chrono::Duration::days(30);

        let pnl_since = |since: DateTime<Utc>| -> Decimal {
            state
                .closed_trades
                .iter()
                .filter(|t| t.close_time >= since)
                .map(|t| t.realized_pnl)
                .sum()
        };

        let wins = state.closed_trades.iter().filter(|t| t.realized_pnl > Decimal::ZERO).count();
        let total = state.closed_trades.len();
        let win_rate = if total > 0 { wins as f64 / total as f64 } else { 0.0 };

        let gross_profit: Decimal = state
            .closed_trades
            .iter()
            .filter(|t| t.realized_pnl > Decimal::ZERO)
            .map(|t| t.realized_pnl)
            .sum();
        let gross_loss: Decimal = state
            .closed_trades
            .iter()
            .filter(|t| t.realized_pnl < Decimal::ZERO)
            .map(|t| t.realized_pnl)
            .sum();
        let profit_factor = if gross_loss != Decimal::ZERO {
            (gross_profit / gross_loss.abs()).to_f64().unwrap_or(0.0)
        } else if gross_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        let max_drawdown = max_equity_drawdown(&state.closed_trades, state.balance);

        signal_core::AccountSummary {
            balance: state.balance,
            equity: state.equity,
            margin: state.margin,
            free_margin: state.free_margin,
            margin_level: state.margin_level,
            open_position_count: state.open_positions.len(),
            day_pnl: pnl_since(day_start),
            week_pnl: pnl_since(week_start),
            month_pnl: pnl_since(month_start),
            max_drawdown,
            win_rate,
            profit_factor,
        }
    }
}

/// Walks the closed-trade curve in close-time order accumulating realized
/// PnL on top of the starting balance, returning the largest peak-to-trough
/// decline observed.
fn max_equity_drawdown(closed_trades: &[ClosedTrade], starting_balance: Decimal) -> Decimal {
    let mut ordered: Vec<&ClosedTrade> = closed_trades.iter().collect();
    ordered.sort_by_key(|t| t.close_time);

    let mut equity = starting_balance;
    let mut peak = starting_balance;
    let mut max_dd = Decimal::ZERO;
    for trade in ordered {
        equity += trade.realized_pnl;
        if equity > peak {
            peak = equity;
        }
        let dd = peak - equity;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}
