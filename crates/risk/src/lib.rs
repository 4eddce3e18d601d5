//! Risk gate: a pure evaluator over position, proposed action, and policy.
//!
//! The gate holds no state of its own. The supervisor calls
//! [`evaluate`] once per tick before the kernel runs (no proposed action)
//! and once per trade request the kernel makes. Checks run in a fixed order
//! and the first match wins.

use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use model::{Position, TradeKind, TradeSide};

/// Risk policy for one strategy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Adverse price move in percent that force-closes the position.
    pub stop_loss_pct: Decimal,
    /// Favorable price move in percent that force-closes the position.
    pub take_profit_pct: Decimal,
    /// Run loss (realized + unrealized) as percent of starting balance that
    /// force-closes and terminates the run.
    pub max_loss_pct: Decimal,
    /// Maximum number of `add` trades per position.
    pub max_additions: u32,
    /// Minimum time between trades.
    pub cooldown: Duration,
}

/// A trade the kernel wants to make, as seen by the gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposedAction {
    pub kind: TradeKind,
    pub side: TradeSide,
}

/// Mutable run facts the gate needs; owned by the supervisor's loop.
#[derive(Debug, Clone)]
pub struct RunRiskState {
    pub start_balance: Decimal,
    pub realized_pnl: Decimal,
    /// Count of `add` trades executed for the current position.
    pub addition_count: u32,
    /// Wall-clock of the last executed trade, if any.
    pub last_trade_at_ms: Option<i64>,
    pub now_ms: i64,
}

/// Why the gate force-closes a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    /// Run-level loss limit; the run must be marked terminal.
    MaxLoss,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop-loss"),
            Self::TakeProfit => write!(f, "take-profit"),
            Self::MaxLoss => write!(f, "max-loss"),
        }
    }
}

/// Why the gate suppresses an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    MaxAdditions { limit: u32 },
    Cooldown { remaining_ms: i64 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxAdditions { limit } => write!(f, "max-additions ({} reached)", limit),
            Self::Cooldown { remaining_ms } => {
                write!(f, "cooldown ({} ms remaining)", remaining_ms)
            }
        }
    }
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskVerdict {
    /// Action (if any) may proceed.
    Allow,
    /// Action is suppressed; the supervisor records a skip event.
    Deny(DenyReason),
    /// The position must be closed before anything else happens.
    ForceClose(CloseReason),
}

/// Evaluate the gate. First match wins:
///
/// 1. position exists and adverse move ≥ stop-loss → force-close
/// 2. position exists and favorable move ≥ take-profit → force-close
/// 3. run loss (realized + unrealized) ≥ max-loss of start balance →
///    force-close, run terminal
/// 4. action is `add` and prior adds ≥ max-additions → deny
/// 5. cooldown not elapsed since last trade → deny
/// 6. allow
pub fn evaluate(
    position: Option<&Position>,
    mark: Decimal,
    action: Option<&ProposedAction>,
    state: &RunRiskState,
    policy: &RiskPolicy,
) -> RiskVerdict {
    if let Some(pos) = position {
        let move_pct = pos.price_move_pct(mark);
        if move_pct <= -policy.stop_loss_pct {
            return RiskVerdict::ForceClose(CloseReason::StopLoss);
        }
        if move_pct >= policy.take_profit_pct {
            return RiskVerdict::ForceClose(CloseReason::TakeProfit);
        }
    }

    if state.start_balance > Decimal::ZERO {
        let unrealized = position
            .map(|p| p.unrealized_pnl(mark))
            .unwrap_or(Decimal::ZERO);
        let loss = -(state.realized_pnl + unrealized);
        let loss_pct = loss / state.start_balance * Decimal::ONE_HUNDRED;
        if loss_pct >= policy.max_loss_pct {
            return RiskVerdict::ForceClose(CloseReason::MaxLoss);
        }
    }

    let Some(action) = action else {
        return RiskVerdict::Allow;
    };

    if action.kind == TradeKind::Add && state.addition_count >= policy.max_additions {
        return RiskVerdict::Deny(DenyReason::MaxAdditions {
            limit: policy.max_additions,
        });
    }

    if let Some(last_ms) = state.last_trade_at_ms {
        let elapsed_ms = state.now_ms - last_ms;
        let cooldown_ms = policy.cooldown.as_millis() as i64;
        if elapsed_ms < cooldown_ms {
            return RiskVerdict::Deny(DenyReason::Cooldown {
                remaining_ms: cooldown_ms - elapsed_ms,
            });
        }
    }

    RiskVerdict::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Fill;
    use rust_decimal_macros::dec;

    fn policy() -> RiskPolicy {
        RiskPolicy {
            stop_loss_pct: dec!(10),
            take_profit_pct: dec!(15),
            max_loss_pct: dec!(20),
            max_additions: 2,
            cooldown: Duration::from_secs(60),
        }
    }

    fn long_position(entry: Decimal, qty: Decimal) -> Position {
        Position::open(
            "BTCUSDT",
            TradeSide::Long,
            &Fill {
                price: entry,
                qty,
                timestamp_ms: 0,
            },
            entry * qty,
            10,
        )
    }

    fn state(now_ms: i64) -> RunRiskState {
        RunRiskState {
            start_balance: dec!(10000),
            realized_pnl: Decimal::ZERO,
            addition_count: 0,
            last_trade_at_ms: None,
            now_ms,
        }
    }

    #[test]
    fn stop_loss_fires_on_adverse_move() {
        let pos = long_position(dec!(50000), dec!(0.004));
        // 11% drop against a 10% stop.
        let verdict = evaluate(Some(&pos), dec!(44500), None, &state(0), &policy());
        assert_eq!(verdict, RiskVerdict::ForceClose(CloseReason::StopLoss));
    }

    #[test]
    fn take_profit_fires_on_favorable_move() {
        let pos = long_position(dec!(50000), dec!(0.004));
        let verdict = evaluate(Some(&pos), dec!(57500), None, &state(0), &policy());
        assert_eq!(verdict, RiskVerdict::ForceClose(CloseReason::TakeProfit));
    }

    #[test]
    fn stop_loss_checked_before_take_profit() {
        // A degenerate policy where both thresholds are zero: the adverse
        // branch is evaluated first.
        let mut p = policy();
        p.stop_loss_pct = Decimal::ZERO;
        p.take_profit_pct = Decimal::ZERO;
        let pos = long_position(dec!(50000), dec!(1));
        let verdict = evaluate(Some(&pos), dec!(49999), None, &state(0), &p);
        assert_eq!(verdict, RiskVerdict::ForceClose(CloseReason::StopLoss));
    }

    #[test]
    fn max_loss_counts_realized_and_unrealized() {
        let pos = long_position(dec!(50000), dec!(0.4));
        let mut st = state(0);
        st.realized_pnl = dec!(-1500);
        // Unrealized: (48500 - 50000) * 0.4 = -600. Total loss 2100 ≥ 20% of
        // 10000.
        let verdict = evaluate(Some(&pos), dec!(48500), None, &st, &policy());
        assert_eq!(verdict, RiskVerdict::ForceClose(CloseReason::MaxLoss));
    }

    #[test]
    fn max_additions_denies_add_only() {
        let pos = long_position(dec!(50000), dec!(0.004));
        let mut st = state(0);
        st.addition_count = 2;

        let add = ProposedAction {
            kind: TradeKind::Add,
            side: TradeSide::Long,
        };
        assert!(matches!(
            evaluate(Some(&pos), dec!(50000), Some(&add), &st, &policy()),
            RiskVerdict::Deny(DenyReason::MaxAdditions { limit: 2 })
        ));

        let close = ProposedAction {
            kind: TradeKind::Close,
            side: TradeSide::Long,
        };
        assert_eq!(
            evaluate(Some(&pos), dec!(50000), Some(&close), &st, &policy()),
            RiskVerdict::Allow
        );
    }

    #[test]
    fn cooldown_denies_until_elapsed() {
        let pos = long_position(dec!(50000), dec!(0.004));
        let action = ProposedAction {
            kind: TradeKind::Add,
            side: TradeSide::Long,
        };

        let mut st = state(30_000);
        st.last_trade_at_ms = Some(0);
        assert!(matches!(
            evaluate(Some(&pos), dec!(50000), Some(&action), &st, &policy()),
            RiskVerdict::Deny(DenyReason::Cooldown { .. })
        ));

        st.now_ms = 60_000;
        assert_eq!(
            evaluate(Some(&pos), dec!(50000), Some(&action), &st, &policy()),
            RiskVerdict::Allow
        );
    }

    #[test]
    fn no_position_no_action_allows() {
        assert_eq!(
            evaluate(None, dec!(50000), None, &state(0), &policy()),
            RiskVerdict::Allow
        );
    }
}
