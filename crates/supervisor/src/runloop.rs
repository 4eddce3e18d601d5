//! The per-strategy control loop.
//!
//! One tokio task per running strategy. Each iteration sleeps for the
//! configured check interval, refreshes the mark price, evaluates the risk
//! gate, runs the kernel once, and executes its trade requests inline — all
//! sequentially. Stop is cooperative: the current tick finishes before the
//! loop tears down.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use event_bus::{Event, EventBus};
use exchange::ExchangeAdapter;
use ledger::{Ledger, LedgerError, NewTrade};
use model::{Position, RunCounters, StrategyStatus, Ticker, TradeKind, TradeSide};
use risk::{evaluate, CloseReason, ProposedAction, RiskPolicy, RiskVerdict, RunRiskState};
use strategies::Kernel;
use strategy_core::{ConfigDoc, KernelError, StrategyContext, TradeRequest};

use crate::supervisor::SupervisorSettings;

/// A stop command delivered to the loop.
#[derive(Debug, Clone, Copy)]
pub struct StopRequest {
    /// Force-close any open position before the run is marked stopped.
    pub close_positions: bool,
}

/// Commands the supervisor can inject into a live loop.
#[derive(Debug)]
pub(crate) enum LoopCommand {
    /// Ask the ML kernel to retrain on its next tick.
    Retrain,
}

/// Why the loop ended.
enum LoopExit {
    Stop(StopRequest),
    /// Max-loss force-close: the position is already flat, the run is
    /// terminal.
    Terminal,
    Error(String),
}

pub(crate) struct LoopState {
    pub strategy_id: i64,
    pub run_id: i64,
    pub symbol: String,
    pub kernel: Kernel,
    pub doc: Arc<ConfigDoc>,
    pub policy: RiskPolicy,
    pub position: Option<Position>,
    pub counters: RunCounters,
    pub risk: RunRiskState,
    pub consecutive_errors: u32,
    pub ledger: Ledger,
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub bus: Arc<EventBus>,
    pub settings: SupervisorSettings,
}

/// Drive one strategy until stop, terminal risk, or error.
pub(crate) async fn run_strategy_loop(
    mut state: LoopState,
    mut stop_rx: watch::Receiver<Option<StopRequest>>,
    mut cmd_rx: mpsc::Receiver<LoopCommand>,
) {
    let check_interval = Duration::from_secs(state.doc.monitoring().check_interval);
    info!(
        strategy_id = state.strategy_id,
        run_id = state.run_id,
        kernel = state.kernel.name(),
        check_interval_s = check_interval.as_secs(),
        "strategy loop started"
    );

    let exit = loop {
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                match changed {
                    Ok(()) => {
                        if let Some(request) = *stop_rx.borrow() {
                            break LoopExit::Stop(request);
                        }
                    }
                    // Supervisor dropped; shut down safely.
                    Err(_) => break LoopExit::Stop(StopRequest { close_positions: true }),
                }
            }

            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    LoopCommand::Retrain => {
                        if state.kernel.force_retrain() {
                            info!(strategy_id = state.strategy_id, "retrain requested");
                        }
                    }
                }
            }

            _ = tokio::time::sleep(check_interval) => {
                if let Err(exit) = state.tick().await {
                    break exit;
                }
            }
        }
    };

    state.teardown(exit).await;
}

impl LoopState {
    fn make_ctx(&self, ticker: Ticker) -> StrategyContext {
        StrategyContext::new(
            self.strategy_id,
            self.run_id,
            self.risk.now_ms,
            Arc::clone(&self.doc),
            ticker,
            self.position.clone(),
            Arc::clone(&self.adapter),
        )
    }

    /// One tick of the decision cycle.
    async fn tick(&mut self) -> Result<(), LoopExit> {
        self.risk.now_ms = Utc::now().timestamp_millis();

        // 1. Refresh the mark and the persisted position snapshot.
        let ticker = match self.adapter.fetch_ticker(&self.symbol).await {
            Ok(t) => t,
            Err(e) => return self.note_kernel_error(KernelError::Venue(e)),
        };
        let price = ticker.last;
        if let Some(pos) = &mut self.position {
            pos.set_mark(price);
            self.ledger
                .upsert_position(self.run_id, self.strategy_id, Some(pos))
                .await
                .map_err(|e| LoopExit::Error(e.to_string()))?;
        }

        // 2./3. Risk gate over the bare position; force-close preempts the
        // kernel this tick.
        if let RiskVerdict::ForceClose(reason) =
            evaluate(self.position.as_ref(), price, None, &self.risk, &self.policy)
        {
            self.force_close(reason).await?;
            if reason == CloseReason::MaxLoss {
                return Err(LoopExit::Terminal);
            }
            self.publish_status();
            return Ok(());
        }

        // 4. One kernel decision step, then its requests through the gate.
        let ctx = self.make_ctx(ticker);
        match self.kernel.run_once(&ctx).await {
            Ok(()) => self.consecutive_errors = 0,
            Err(e) => {
                self.note_kernel_error(e)?;
                self.publish_status();
                return Ok(());
            }
        }

        for request in ctx.take_requests() {
            let action = ProposedAction {
                kind: request.kind(),
                side: match &request {
                    TradeRequest::Open { side, .. } | TradeRequest::Add { side, .. } => *side,
                    TradeRequest::Close { .. } => self
                        .position
                        .as_ref()
                        .map(|p| p.side)
                        .unwrap_or(TradeSide::Long),
                },
            };
            match evaluate(
                self.position.as_ref(),
                price,
                Some(&action),
                &self.risk,
                &self.policy,
            ) {
                RiskVerdict::Allow => self.execute_request(request).await?,
                RiskVerdict::Deny(reason) => {
                    info!(
                        strategy_id = self.strategy_id,
                        reason = %reason,
                        kind = %action.kind,
                        "risk gate denied request"
                    );
                    self.bus.publish(Event::Error {
                        strategy_id: Some(self.strategy_id),
                        kind: "risk_denied".into(),
                        message: reason.to_string(),
                    });
                }
                RiskVerdict::ForceClose(reason) => {
                    self.force_close(reason).await?;
                    if reason == CloseReason::MaxLoss {
                        return Err(LoopExit::Terminal);
                    }
                    break;
                }
            }
        }

        // 5. Status heartbeat.
        self.publish_status();
        Ok(())
    }

    /// Execute one allowed trade request against the venue and book it.
    async fn execute_request(&mut self, request: TradeRequest) -> Result<(), LoopExit> {
        match request {
            TradeRequest::Open { side, notional } | TradeRequest::Add { side, notional } => {
                let kind = if self.position.is_some() {
                    TradeKind::Add
                } else {
                    TradeKind::Open
                };
                let fill = match self.adapter.open_market(&self.symbol, side, notional).await {
                    Ok(f) => f,
                    Err(e) => return self.note_order_failure(e),
                };

                let leverage = self
                    .doc
                    .trading()
                    .map(|t| t.leverage)
                    .unwrap_or(1);
                match &mut self.position {
                    Some(pos) => pos.add(&fill, notional),
                    None => {
                        self.position =
                            Some(Position::open(&self.symbol, side, &fill, notional, leverage));
                    }
                }
                if kind == TradeKind::Add {
                    self.risk.addition_count += 1;
                } else {
                    self.risk.addition_count = 0;
                }

                let quantity = fill.qty;
                let price = fill.price;
                let executed_at = fill_time(fill.timestamp_ms);
                self.book_trade(NewTrade {
                    strategy_id: self.strategy_id,
                    run_id: self.run_id,
                    kind,
                    side,
                    symbol: self.symbol.clone(),
                    price,
                    quantity,
                    notional,
                    pnl: None,
                    executed_at,
                })
                .await
            }
            TradeRequest::Close { quantity } => {
                let Some(side) = self.position.as_ref().map(|p| p.side) else {
                    return Ok(());
                };
                let fill = match quantity {
                    None => self.adapter.close_market(&self.symbol, side).await,
                    Some(qty) => self.adapter.reduce_market(&self.symbol, side, qty).await,
                };
                let fill = match fill {
                    Ok(f) => f,
                    Err(e) => return self.note_order_failure(e),
                };

                let mut flat = true;
                let mut pnl = Decimal::ZERO;
                if let Some(pos) = &mut self.position {
                    pnl = pos.reduce(fill.price, fill.qty);
                    flat = pos.is_flat();
                }
                if flat {
                    self.position = None;
                    self.risk.addition_count = 0;
                }
                self.risk.realized_pnl += pnl;

                let notional = fill.price * fill.qty;
                let executed_at = fill_time(fill.timestamp_ms);
                self.book_trade(NewTrade {
                    strategy_id: self.strategy_id,
                    run_id: self.run_id,
                    kind: TradeKind::Close,
                    side,
                    symbol: self.symbol.clone(),
                    price: fill.price,
                    quantity: fill.qty,
                    notional,
                    pnl: Some(pnl),
                    executed_at,
                })
                .await
            }
        }
    }

    /// Append a trade, sync the position snapshot, notify the kernel,
    /// publish events. An append against a just-closed run is a
    /// reconciliation anomaly: logged and published, never retried.
    async fn book_trade(&mut self, trade: NewTrade) -> Result<(), LoopExit> {
        match self.ledger.append_trade(&trade).await {
            Ok((record, counters)) => {
                self.counters = counters;
                self.risk.last_trade_at_ms = Some(record.executed_at.timestamp_millis());
                self.kernel.on_trade(&record);

                self.ledger
                    .upsert_position(self.run_id, self.strategy_id, self.position.as_ref())
                    .await
                    .map_err(|e| LoopExit::Error(e.to_string()))?;

                info!(
                    strategy_id = self.strategy_id,
                    kind = %record.kind,
                    side = %record.side,
                    price = %record.price,
                    quantity = %record.quantity,
                    pnl = ?record.pnl,
                    "trade booked"
                );
                self.bus.publish(Event::Trade { trade: record });
                self.bus.publish(Event::Position {
                    strategy_id: self.strategy_id,
                    position: self.position.clone(),
                });
                Ok(())
            }
            Err(LedgerError::RunClosed { run_id }) => {
                warn!(
                    strategy_id = self.strategy_id,
                    run_id, "trade executed after run closed; reconciliation required"
                );
                self.bus.publish(Event::Error {
                    strategy_id: Some(self.strategy_id),
                    kind: "reconciliation_anomaly".into(),
                    message: format!("fill arrived after run {} closed", run_id),
                });
                Ok(())
            }
            Err(e) => Err(LoopExit::Error(e.to_string())),
        }
    }

    /// Force-close the current position at market.
    async fn force_close(&mut self, reason: CloseReason) -> Result<(), LoopExit> {
        warn!(
            strategy_id = self.strategy_id,
            reason = %reason,
            "risk gate force-close"
        );
        self.bus.publish(Event::Error {
            strategy_id: Some(self.strategy_id),
            kind: "force_close".into(),
            message: reason.to_string(),
        });
        self.execute_request(TradeRequest::Close { quantity: None })
            .await
    }

    /// Classify a kernel error: recoverables are counted until the
    /// threshold; everything else ends the run.
    fn note_kernel_error(&mut self, e: KernelError) -> Result<(), LoopExit> {
        let kind = match &e {
            KernelError::Config(_) => "config",
            KernelError::Venue(v) if v.is_transient() => "venue_transient",
            KernelError::Venue(_) => "venue_permanent",
            KernelError::Recoverable(_) => "kernel",
        };
        error!(
            strategy_id = self.strategy_id,
            kind, error = %e, "kernel error"
        );
        self.bus.publish(Event::Error {
            strategy_id: Some(self.strategy_id),
            kind: kind.into(),
            message: e.to_string(),
        });

        if !e.is_recoverable() {
            return Err(LoopExit::Error(e.to_string()));
        }
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.settings.max_consecutive_errors {
            return Err(LoopExit::Error(format!(
                "{} consecutive kernel errors, last: {}",
                self.consecutive_errors, e
            )));
        }
        Ok(())
    }

    /// A failed order placement: the venue is the source of truth, so no
    /// trade is recorded. Transient exhaustion keeps the run alive;
    /// permanent rejection ends it.
    fn note_order_failure(&mut self, e: exchange::VenueError) -> Result<(), LoopExit> {
        error!(strategy_id = self.strategy_id, error = %e, "order placement failed");
        self.bus.publish(Event::Error {
            strategy_id: Some(self.strategy_id),
            kind: "order_failed".into(),
            message: e.to_string(),
        });
        if e.is_transient() {
            Ok(())
        } else {
            Err(LoopExit::Error(e.to_string()))
        }
    }

    fn publish_status(&self) {
        self.bus.publish(Event::StrategyStatus {
            strategy_id: self.strategy_id,
            status: StrategyStatus::Running,
            counters: self.counters.clone(),
        });
    }

    /// Tear the run down according to how the loop ended.
    async fn teardown(mut self, exit: LoopExit) {
        let (final_status, note, close_positions) = match &exit {
            LoopExit::Stop(req) => (StrategyStatus::Stopped, None, req.close_positions),
            LoopExit::Terminal => (
                StrategyStatus::Stopped,
                Some("max loss limit reached".to_string()),
                false,
            ),
            LoopExit::Error(msg) => (StrategyStatus::Error, Some(msg.clone()), false),
        };

        if close_positions && self.position.is_some() {
            self.risk.now_ms = Utc::now().timestamp_millis();
            if let Err(exit) = self
                .execute_request(TradeRequest::Close { quantity: None })
                .await
            {
                let msg = match exit {
                    LoopExit::Error(m) => m,
                    _ => "close interrupted".to_string(),
                };
                error!(
                    strategy_id = self.strategy_id,
                    error = %msg,
                    "failed to flatten position on stop; manual reconciliation required"
                );
                self.bus.publish(Event::Error {
                    strategy_id: Some(self.strategy_id),
                    kind: "stop_close_failed".into(),
                    message: msg,
                });
            }
        }

        // A best-effort market snapshot for the shutdown context.
        let ticker = match self.adapter.fetch_ticker(&self.symbol).await {
            Ok(t) => t,
            Err(_) => {
                let mark = self
                    .position
                    .as_ref()
                    .map(|p| p.mark_price)
                    .unwrap_or(Decimal::ZERO);
                Ticker {
                    bid: mark,
                    ask: mark,
                    last: mark,
                    mark,
                    timestamp_ms: Utc::now().timestamp_millis(),
                }
            }
        };
        let ctx = self.make_ctx(ticker);
        let reason = match &exit {
            LoopExit::Stop(_) => "stop",
            LoopExit::Terminal => "max-loss",
            LoopExit::Error(_) => "error",
        };
        self.kernel.shutdown(&ctx, reason).await;

        let end_balance = match self.adapter.fetch_balance().await {
            Ok(b) => b.total,
            Err(e) => {
                warn!(error = %e, "could not fetch ending balance, using starting balance");
                self.risk.start_balance
            }
        };

        if let Err(e) = self
            .ledger
            .close_run(self.run_id, end_balance, final_status, note.as_deref())
            .await
        {
            error!(run_id = self.run_id, error = %e, "failed to close run");
        }
        if let Err(e) = self
            .ledger
            .set_strategy_status(self.strategy_id, final_status)
            .await
        {
            error!(strategy_id = self.strategy_id, error = %e, "failed to update status");
        }

        self.bus.publish(Event::StrategyStatus {
            strategy_id: self.strategy_id,
            status: final_status,
            counters: self.counters.clone(),
        });
        info!(
            strategy_id = self.strategy_id,
            run_id = self.run_id,
            status = %final_status,
            "strategy loop ended"
        );
    }
}

fn fill_time(timestamp_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_else(Utc::now)
}
