//! USDT-margined futures adapter.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use common::{RetryPolicy, VenueEnvironment};
use model::{Balance, Bar, Fill, Ticker, Timeframe, TradeSide, VenuePosition};

use crate::adapter::{entry_order_side, exit_order_side, ExchangeAdapter, OrderSide};
use crate::credentials::ApiCredentials;
use crate::error::VenueError;
use crate::precision::{normalize_symbol, SymbolRules};
use crate::rest::Rest;
use crate::signer::signed_query;

/// Live adapter over the venue's futures REST API.
///
/// One instance per venue+credentials pair, shared by every strategy loop.
/// Orders on the same symbol are serialized through a per-symbol lock so
/// that quantity sizing never races; orders on distinct symbols proceed
/// concurrently.
pub struct BinanceFuturesAdapter {
    rest: Rest,
    credentials: ApiCredentials,
    environment: VenueEnvironment,
    retry: RetryPolicy,
    rules: DashMap<String, SymbolRules>,
    order_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BinanceFuturesAdapter {
    pub fn new(
        credentials: ApiCredentials,
        environment: VenueEnvironment,
    ) -> Result<Self, VenueError> {
        let rest = Rest::new(environment.rest_base_url())?;
        Ok(Self {
            rest,
            credentials,
            environment,
            retry: RetryPolicy::default(),
            rules: DashMap::new(),
            order_locks: DashMap::new(),
        })
    }

    pub fn environment(&self) -> VenueEnvironment {
        self.environment
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Public endpoint with transient retry.
    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, VenueError> {
        let mut attempt = 0u32;
        loop {
            match self
                .rest
                .request(Method::GET, path, Some(query), None)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.retry.allows_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(path, attempt, error = %e, "transient venue error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Signed endpoint with transient retry. The query is re-signed with a
    /// fresh timestamp on every attempt.
    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, VenueError> {
        let mut attempt = 0u32;
        loop {
            let query = signed_query(&self.credentials, params, Self::now_ms());
            match self
                .rest
                .request(
                    method.clone(),
                    path,
                    Some(&query),
                    Some(self.credentials.api_key()),
                )
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.retry.allows_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(path, attempt, error = %e, "transient venue error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Venue precision rules for a symbol, cached after the first lookup.
    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, VenueError> {
        if let Some(rules) = self.rules.get(symbol) {
            return Ok(rules.clone());
        }

        let info: Value = self
            .public_get("/fapi/v1/exchangeInfo", &format!("symbol={}", symbol))
            .await?;
        let entry = info["symbols"]
            .as_array()
            .and_then(|arr| arr.iter().find(|s| s["symbol"] == symbol))
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;

        let price_decimals = entry["pricePrecision"]
            .as_u64()
            .ok_or_else(|| VenueError::Parse("missing pricePrecision".into()))?
            as u32;
        let amount_decimals = entry["quantityPrecision"]
            .as_u64()
            .ok_or_else(|| VenueError::Parse("missing quantityPrecision".into()))?
            as u32;
        let min_notional = entry["filters"]
            .as_array()
            .and_then(|filters| {
                filters
                    .iter()
                    .find(|f| f["filterType"] == "MIN_NOTIONAL")
                    .and_then(|f| f["notional"].as_str())
                    .and_then(|s| s.parse::<Decimal>().ok())
            })
            .unwrap_or(Decimal::ZERO);

        let rules = SymbolRules {
            price_decimals,
            amount_decimals,
            min_notional,
        };
        self.rules.insert(symbol.to_string(), rules.clone());
        Ok(rules)
    }

    fn order_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.order_locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn mark_price(&self, symbol: &str) -> Result<(Decimal, i64), VenueError> {
        let premium: Value = self
            .public_get("/fapi/v1/premiumIndex", &format!("symbol={}", symbol))
            .await?;
        let mark = decimal_field(&premium, "markPrice")?;
        let time = premium["time"].as_i64().unwrap_or_else(Self::now_ms);
        Ok((mark, time))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<Fill, VenueError> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_venue_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        let response: Value = self
            .signed_request(Method::POST, "/fapi/v1/order", &params)
            .await?;

        let price = decimal_field(&response, "avgPrice")?;
        let qty = decimal_field(&response, "executedQty")?;
        let timestamp_ms = response["updateTime"].as_i64().unwrap_or_else(Self::now_ms);

        tracing::info!(
            symbol,
            side = side.as_venue_str(),
            price = %price,
            qty = %qty,
            reduce_only,
            "market order filled"
        );

        Ok(Fill {
            price,
            qty,
            timestamp_ms,
        })
    }
}

fn decimal_field(value: &Value, field: &str) -> Result<Decimal, VenueError> {
    value[field]
        .as_str()
        .ok_or_else(|| VenueError::Parse(format!("missing field '{}'", field)))?
        .parse::<Decimal>()
        .map_err(|e| VenueError::Parse(format!("bad decimal in '{}': {}", field, e)))
}

fn bar_from_kline(row: &Value) -> Result<Bar, VenueError> {
    let parse = |idx: usize| -> Result<Decimal, VenueError> {
        row[idx]
            .as_str()
            .ok_or_else(|| VenueError::Parse(format!("kline field {} missing", idx)))?
            .parse::<Decimal>()
            .map_err(|e| VenueError::Parse(format!("kline field {}: {}", idx, e)))
    };
    Ok(Bar {
        open_time_ms: row[0]
            .as_i64()
            .ok_or_else(|| VenueError::Parse("kline open time missing".into()))?,
        open: parse(1)?,
        high: parse(2)?,
        low: parse(3)?,
        close: parse(4)?,
        volume: parse(5)?,
    })
}

#[async_trait]
impl ExchangeAdapter for BinanceFuturesAdapter {
    async fn configure_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError> {
        let symbol = normalize_symbol(symbol);
        let params = [
            ("symbol", symbol.clone()),
            ("leverage", leverage.to_string()),
        ];
        let _: Value = self
            .signed_request(Method::POST, "/fapi/v1/leverage", &params)
            .await?;
        tracing::info!(symbol = %symbol, leverage, "leverage configured");
        Ok(())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, VenueError> {
        let symbol = normalize_symbol(symbol);

        let book: Value = self
            .public_get("/fapi/v1/ticker/bookTicker", &format!("symbol={}", symbol))
            .await?;
        let last: Value = self
            .public_get("/fapi/v1/ticker/price", &format!("symbol={}", symbol))
            .await?;
        let (mark, timestamp_ms) = self.mark_price(&symbol).await?;

        Ok(Ticker {
            bid: decimal_field(&book, "bidPrice")?,
            ask: decimal_field(&book, "askPrice")?,
            last: decimal_field(&last, "price")?,
            mark,
            timestamp_ms,
        })
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Bar>, VenueError> {
        let symbol = normalize_symbol(symbol);
        let query = format!(
            "symbol={}&interval={}&limit={}",
            symbol,
            timeframe.as_str(),
            limit
        );
        let rows: Vec<Value> = self.public_get("/fapi/v1/klines", &query).await?;
        rows.iter().map(bar_from_kline).collect()
    }

    async fn open_market(
        &self,
        symbol: &str,
        side: TradeSide,
        notional: Decimal,
    ) -> Result<Fill, VenueError> {
        let symbol = normalize_symbol(symbol);
        let rules = self.symbol_rules(&symbol).await?;
        let lock = self.order_lock(&symbol);
        let _guard = lock.lock().await;

        let (mark, _) = self.mark_price(&symbol).await?;
        if mark <= Decimal::ZERO {
            return Err(VenueError::Parse("non-positive mark price".into()));
        }

        let quantity = rules.round_amount(notional / mark);
        if quantity <= Decimal::ZERO {
            return Err(VenueError::BelowMinNotional {
                notional,
                min: rules.min_notional,
            });
        }
        let effective_notional = quantity * mark;
        if effective_notional < rules.min_notional {
            return Err(VenueError::BelowMinNotional {
                notional: effective_notional,
                min: rules.min_notional,
            });
        }

        self.place_market_order(&symbol, entry_order_side(side), quantity, false)
            .await
    }

    async fn close_market(&self, symbol: &str, side: TradeSide) -> Result<Fill, VenueError> {
        let symbol = normalize_symbol(symbol);
        let lock = self.order_lock(&symbol);
        let _guard = lock.lock().await;

        let position = self
            .fetch_position(&symbol)
            .await?
            .ok_or_else(|| VenueError::OrderRejected(format!("no open position on {}", symbol)))?;

        self.place_market_order(&symbol, exit_order_side(side), position.quantity, true)
            .await
    }

    async fn reduce_market(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<Fill, VenueError> {
        let symbol = normalize_symbol(symbol);
        let rules = self.symbol_rules(&symbol).await?;
        let lock = self.order_lock(&symbol);
        let _guard = lock.lock().await;

        let quantity = rules.round_amount(quantity);
        if quantity <= Decimal::ZERO {
            return Err(VenueError::OrderRejected(
                "reduce quantity rounds to zero".into(),
            ));
        }
        self.place_market_order(&symbol, exit_order_side(side), quantity, true)
            .await
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Option<VenuePosition>, VenueError> {
        let symbol = normalize_symbol(symbol);
        let params = [("symbol", symbol.clone())];
        let rows: Vec<Value> = self
            .signed_request(Method::GET, "/fapi/v2/positionRisk", &params)
            .await?;

        for row in &rows {
            let amount = decimal_field(row, "positionAmt")?;
            if amount.is_zero() {
                continue;
            }
            let side = if amount > Decimal::ZERO {
                TradeSide::Long
            } else {
                TradeSide::Short
            };
            let leverage = row["leverage"]
                .as_str()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(1);
            return Ok(Some(VenuePosition {
                symbol: symbol.clone(),
                side,
                entry_price: decimal_field(row, "entryPrice")?,
                quantity: amount.abs(),
                leverage,
                mark_price: decimal_field(row, "markPrice")?,
                unrealized_pnl: decimal_field(row, "unRealizedProfit")?,
            }));
        }
        Ok(None)
    }

    async fn fetch_balance(&self) -> Result<Balance, VenueError> {
        let rows: Vec<Value> = self
            .signed_request(Method::GET, "/fapi/v2/balance", &[])
            .await?;

        let usdt = rows
            .iter()
            .find(|row| row["asset"] == "USDT")
            .ok_or_else(|| VenueError::Parse("no USDT balance entry".into()))?;

        let wallet = decimal_field(usdt, "balance")?;
        let upnl = decimal_field(usdt, "crossUnPnl").unwrap_or(Decimal::ZERO);
        let free = decimal_field(usdt, "availableBalance")?;
        let total = wallet + upnl;

        Ok(Balance {
            total,
            free,
            used: total - free,
        })
    }
}
