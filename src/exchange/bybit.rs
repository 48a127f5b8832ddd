//! # exchange::bybit — Bybit v5 REST client
//!
//! USDT linear perpetuals only (`category=linear`, `settleCoin=USDT`).
//!
//! ## Signing
//! Private requests carry four headers:
//!
//! ```text
//! X-BAPI-API-KEY      api key
//! X-BAPI-TIMESTAMP    unix millis
//! X-BAPI-RECV-WINDOW  ms the server accepts the request for
//! X-BAPI-SIGN         hex(HMAC-SHA256(secret, ts + key + recv_window + payload))
//! ```
//!
//! `payload` is the raw query string for GET and the exact JSON body for POST.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::{ClientError, ExchangeError};
use crate::exchange::{Candle, InstrumentInfo, MarketData, TradingClient};
use crate::models::{Direction, ExecutionReceipt, OrderKind, OrderRequest, Position};

type HmacSha256 = Hmac<Sha256>;

const CATEGORY: &str = "linear";
const SETTLE_COIN: &str = "USDT";

/// retCodes Bybit uses for bad, expired or mismatched API keys.
const AUTH_RET_CODES: &[i64] = &[10003, 10004, 10005, 10007, 33004];
/// retCodes for request-rate throttling.
const RATE_LIMIT_RET_CODES: &[i64] = &[10006, 10018];

// ─── Client ───────────────────────────────────────────────────────────────────

pub struct BybitClient {
    http:           reqwest::Client,
    base_url:       String,
    credentials:    Option<Credentials>,
    recv_window_ms: u64,
}

impl BybitClient {
    /// Unauthenticated client for market data.
    pub fn public(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        info!(endpoint = %base_url, "📈 Bybit market-data client ready");
        Ok(Self {
            http,
            base_url:       base_url.trim_end_matches('/').to_string(),
            credentials:    None,
            recv_window_ms: 5000,
        })
    }

    /// Signed client for the trading endpoint.
    pub fn authenticated(
        base_url:       &str,
        credentials:    Credentials,
        timeout:        Duration,
        recv_window_ms: u64,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        info!(
            endpoint   = %base_url,
            key_prefix = %credentials.key_prefix(),
            "🔑 Bybit trading client ready"
        );
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: Some(credentials),
            recv_window_ms,
        })
    }

    fn key_prefix(&self) -> String {
        self.credentials
            .as_ref()
            .map(Credentials::key_prefix)
            .unwrap_or_else(|| "<none>".to_string())
    }

    fn auth_error(&self, message: impl Into<String>) -> ExchangeError {
        ExchangeError::Authentication {
            endpoint:   self.base_url.clone(),
            key_prefix: self.key_prefix(),
            message:    message.into(),
        }
    }

    fn signed_headers(&self, payload: &str) -> Result<Vec<(&'static str, String)>, ExchangeError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| self.auth_error("client has no credentials"))?;

        let timestamp = Utc::now().timestamp_millis().to_string();
        let recv_window = self.recv_window_ms.to_string();
        let signature = sign(&creds.api_secret, &timestamp, &creds.api_key, &recv_window, payload)
            .map_err(|e| self.auth_error(e))?;

        Ok(vec![
            ("X-BAPI-API-KEY", creds.api_key.clone()),
            ("X-BAPI-TIMESTAMP", timestamp),
            ("X-BAPI-RECV-WINDOW", recv_window),
            ("X-BAPI-SIGN", signature),
        ])
    }

    // ── Transport ────────────────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(
        &self,
        path:   &str,
        query:  &[(&str, String)],
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let query_string = encode_query(query);
        let url = format!("{}{}?{}", self.base_url, path, query_string);

        let mut request = self.http.get(&url);
        if signed {
            for (name, value) in self.signed_headers(&query_string)? {
                request = request.header(name, value);
            }
        }

        debug!(url = %url, "Bybit GET");
        let resp = request.send().await?;
        self.decode(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ExchangeError> {
        let payload = body.to_string();
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        for (name, value) in self.signed_headers(&payload)? {
            request = request.header(name, value);
        }

        debug!(url = %url, body = %payload, "Bybit POST");
        let resp = request.body(payload).send().await?;
        self.decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, ExchangeError> {
        let status = resp.status();
        let text = resp.text().await?;

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(e) => {
                // Gateways answer 401/403/429 with HTML or plain text.
                return Err(match classify(status, None, &text) {
                    Failure::Auth(msg) => self.auth_error(msg),
                    Failure::Other(err) => {
                        if status.is_success() {
                            ExchangeError::Decode(e.to_string())
                        } else {
                            err
                        }
                    }
                });
            }
        };

        if envelope.ret_code != 0 || !status.is_success() {
            return Err(match classify(status, Some(envelope.ret_code), &envelope.ret_msg) {
                Failure::Auth(msg) => {
                    warn!(
                        endpoint   = %self.base_url,
                        key_prefix = %self.key_prefix(),
                        ret_code   = envelope.ret_code,
                        "⛔ Bybit rejected credentials"
                    );
                    self.auth_error(msg)
                }
                Failure::Other(err) => err,
            });
        }

        serde_json::from_value(envelope.result)
            .map_err(|e| ExchangeError::Decode(format!("result: {e}")))
    }
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg:  String,
    #[serde(default)]
    result:   Value,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerRow {
    last_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentRow {
    lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LotSizeFilter {
    qty_step:      String,
    min_order_qty: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    symbol:       String,
    #[serde(default)]
    side:         String,
    #[serde(default)]
    size:         String,
    #[serde(default)]
    avg_price:    String,
    #[serde(default)]
    stop_loss:    String,
    #[serde(default)]
    take_profit:  String,
    #[serde(default)]
    created_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: String,
}

// ─── MarketData ───────────────────────────────────────────────────────────────

#[async_trait]
impl MarketData for BybitClient {
    async fn last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let result: ListResult<TickerRow> = self
            .get(
                "/v5/market/tickers",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
                false,
            )
            .await?;

        let row = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("no ticker for {symbol}")))?;
        let price = parse_decimal("lastPrice", &row.last_price)?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::Decode(format!("non-positive price for {symbol}")));
        }
        Ok(price)
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentInfo, ExchangeError> {
        let result: ListResult<InstrumentRow> = self
            .get(
                "/v5/market/instruments-info",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
                false,
            )
            .await?;

        let row = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("unknown instrument {symbol}")))?;
        Ok(InstrumentInfo {
            qty_step: parse_decimal("qtyStep", &row.lot_size_filter.qty_step)?,
            min_qty:  parse_decimal("minOrderQty", &row.lot_size_filter.min_order_qty)?,
        })
    }

    async fn candles(
        &self,
        symbol:   &str,
        interval: &str,
        limit:    usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let result: ListResult<Vec<String>> = self
            .get(
                "/v5/market/kline",
                &[
                    ("category", CATEGORY.to_string()),
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;

        parse_klines(result.list)
    }
}

// ─── TradingClient ────────────────────────────────────────────────────────────

#[async_trait]
impl TradingClient for BybitClient {
    async fn list_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let result: ListResult<PositionRow> = self
            .get(
                "/v5/position/list",
                &[("category", CATEGORY.to_string()), ("settleCoin", SETTLE_COIN.to_string())],
                true,
            )
            .await?;

        let mut positions = Vec::new();
        for row in result.list {
            if let Some(pos) = position_from_row(row)? {
                positions.push(pos);
            }
        }
        Ok(positions)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<ExecutionReceipt, ExchangeError> {
        let body = order_body(order);
        let ack: OrderAck = self.post("/v5/order/create", &body).await?;

        info!(
            order_id = %ack.order_id,
            symbol   = %order.symbol,
            side     = order.side(),
            qty      = %order.size,
            reduce   = order.reduce_only,
            "✅ Bybit order accepted"
        );
        Ok(ExecutionReceipt::for_order(ack.order_id, order, false))
    }

    async fn close_position(&self, position: &Position) -> Result<ExecutionReceipt, ExchangeError> {
        self.place_order(&OrderRequest::close_for(position)).await
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

// ─── Pure helpers ─────────────────────────────────────────────────────────────

/// Hex HMAC-SHA256 over `timestamp + api_key + recv_window + payload`.
pub(crate) fn sign(
    secret:      &str,
    timestamp:   &str,
    api_key:     &str,
    recv_window: &str,
    payload:     &str,
) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("invalid secret: {e}"))?;
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Symbols are validated alphanumeric before they get here, so no escaping.
fn encode_query(query: &[(&str, String)]) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, PartialEq)]
enum Failure {
    /// Credentials problem; the caller attaches endpoint and key prefix.
    Auth(String),
    Other(ExchangeError),
}

fn classify(status: StatusCode, ret_code: Option<i64>, message: &str) -> Failure {
    let message = message.trim().chars().take(200).collect::<String>();

    if let Some(code) = ret_code {
        if AUTH_RET_CODES.contains(&code) {
            return Failure::Auth(format!("retCode={code} {message}"));
        }
        if RATE_LIMIT_RET_CODES.contains(&code) {
            return Failure::Other(ExchangeError::RateLimited(format!("retCode={code} {message}")));
        }
    }

    if status == StatusCode::UNAUTHORIZED {
        return Failure::Auth(format!("HTTP 401 {message}"));
    }
    if status == StatusCode::FORBIDDEN && mentions_credentials(&message) {
        return Failure::Auth(format!("HTTP 403 {message}"));
    }
    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && message.to_ascii_lowercase().contains("too frequent"))
    {
        return Failure::Other(ExchangeError::RateLimited(format!("HTTP {} {message}", status.as_u16())));
    }
    if status.is_server_error() {
        return Failure::Other(ExchangeError::Network(format!("HTTP {} {message}", status.as_u16())));
    }

    match ret_code {
        Some(code) if code != 0 => Failure::Other(ExchangeError::Rejected { code, message }),
        _ => Failure::Other(ExchangeError::Rejected {
            code:    i64::from(status.as_u16()),
            message: format!("HTTP {} {message}", status.as_u16()),
        }),
    }
}

fn mentions_credentials(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["api key", "api-key", "apikey", "sign", "permission", "unauthor"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| ExchangeError::Decode(format!("{field}='{raw}': {e}")))
}

/// Bybit sends `""` or `"0"` for an unset stop / target.
fn optional_price(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok().filter(|d| !d.is_zero())
}

/// `None` for flat rows (size 0 or side `"None"`).
fn position_from_row(row: PositionRow) -> Result<Option<Position>, ExchangeError> {
    let size = if row.size.trim().is_empty() {
        Decimal::ZERO
    } else {
        parse_decimal("size", &row.size)?
    };
    if size <= Decimal::ZERO {
        return Ok(None);
    }
    let Some(direction) = Direction::from_side(&row.side) else {
        return Ok(None);
    };

    let opened_at = row
        .created_time
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Some(Position {
        symbol: row.symbol,
        direction,
        entry_price: optional_price(&row.avg_price).unwrap_or(Decimal::ZERO),
        size,
        opened_at,
        stop_loss: optional_price(&row.stop_loss),
        take_profit: optional_price(&row.take_profit),
        entries: 1,
    }))
}

/// Rows are `[startTime, open, high, low, close, volume, turnover]`, newest
/// first. Returned oldest first.
fn parse_klines(rows: Vec<Vec<String>>) -> Result<Vec<Candle>, ExchangeError> {
    let mut candles = rows
        .into_iter()
        .map(|row| {
            if row.len() < 5 {
                return Err(ExchangeError::Decode(format!("short kline row: {row:?}")));
            }
            Ok(Candle {
                open_time_ms: row[0]
                    .parse()
                    .map_err(|e| ExchangeError::Decode(format!("kline time '{}': {e}", row[0])))?,
                open:  parse_decimal("open", &row[1])?,
                high:  parse_decimal("high", &row[2])?,
                low:   parse_decimal("low", &row[3])?,
                close: parse_decimal("close", &row[4])?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.open_time_ms);
    Ok(candles)
}

fn order_body(order: &OrderRequest) -> Value {
    let mut body = json!({
        "category":    CATEGORY,
        "symbol":      order.symbol,
        "side":        order.side(),
        "orderType":   order.kind.as_bybit(),
        "qty":         order.size.normalize().to_string(),
        "reduceOnly":  order.reduce_only,
        "orderLinkId": order.link_id,
        "positionIdx": 0,
    });
    if let (OrderKind::Limit, Some(price)) = (order.kind, order.limit_price) {
        body["price"] = json!(price.normalize().to_string());
        body["timeInForce"] = json!("GTC");
    } else {
        body["timeInForce"] = json!("IOC");
    }
    if let Some(stop) = order.stop_loss {
        body["stopLoss"] = json!(stop.normalize().to_string());
    }
    body
}
