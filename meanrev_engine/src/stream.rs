/// stream.rs — Hyperliquid public trades feed
///
/// One task per coin.  Each session:
///   connect (timeout) → subscribe trades → loop {
///       trade batch   → PriceTicks onto the queue
///       ping timer    → {"method":"ping"} every `ping_interval` (30 s)
///       no inbound frame for `stale_after` (90 s) → reconnect
///       shutdown      → unsubscribe, close, return
///   }
/// Failed sessions are retried with capped exponential back-off until shutdown.
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::models::{OrderSide, PriceTick};
use crate::schedule::{Backoff, ShutdownSignal};

pub const PING_MESSAGE: &str = r#"{"method":"ping"}"#;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Server drops idle connections after 60 s; pings keep us well under that.
const STALE_AFTER: Duration = Duration::from_secs(90);

pub fn subscribe_message(coin: &str) -> String {
    json!({"method": "subscribe", "subscription": {"type": "trades", "coin": coin}}).to_string()
}

pub fn unsubscribe_message(coin: &str) -> String {
    json!({"method": "unsubscribe", "subscription": {"type": "trades", "coin": coin}}).to_string()
}

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    channel: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct WsTrade {
    coin: String,
    side: String,
    px: String,
    sz: String,
    time: i64,
}

impl WsTrade {
    fn to_tick(&self) -> Result<PriceTick, String> {
        let price: f64 = self.px.parse().map_err(|_| format!("bad px {:?}", self.px))?;
        let size: f64 = self.sz.parse().map_err(|_| format!("bad sz {:?}", self.sz))?;
        let side = match self.side.as_str() {
            "B" => OrderSide::Buy,
            "A" => OrderSide::Sell,
            other => return Err(format!("bad side {other:?}")),
        };
        Ok(PriceTick::new(self.time, price, price * size).with_side(side))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Trades { ticks: Vec<PriceTick>, skipped: usize },
    Pong,
    SubscriptionResponse,
    Other(String),
}

/// Decode one text frame.  Trades for other coins are ignored; malformed
/// trade entries are skipped and counted.
pub fn parse_message(text: &str, coin: &str) -> Result<FeedMessage, FeedError> {
    let env: WsEnvelope =
        serde_json::from_str(text).map_err(|e| FeedError::Protocol(format!("{e}: {text}")))?;
    match env.channel.as_str() {
        "trades" => {
            let Value::Array(entries) = env.data else {
                return Err(FeedError::Protocol("trades data is not an array".into()));
            };
            let mut ticks = Vec::with_capacity(entries.len());
            let mut skipped = 0;
            for entry in entries {
                let parsed = serde_json::from_value::<WsTrade>(entry)
                    .map_err(|e| e.to_string())
                    .and_then(|t| {
                        if t.coin.eq_ignore_ascii_case(coin) { t.to_tick().map(Some) } else { Ok(None) }
                    });
                match parsed {
                    Ok(Some(tick)) => ticks.push(tick),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Skipping malformed trade: {}", e);
                        skipped += 1;
                    }
                }
            }
            Ok(FeedMessage::Trades { ticks, skipped })
        }
        "pong" => Ok(FeedMessage::Pong),
        "subscriptionResponse" => Ok(FeedMessage::SubscriptionResponse),
        other => Ok(FeedMessage::Other(other.to_owned())),
    }
}

enum SessionEnd {
    Shutdown,
    /// Server closed or went quiet; `healthy` if trades flowed first
    Dropped { healthy: bool, reason: FeedError },
}

pub struct TradeFeed {
    ws_url: String,
    coin: String,
    tx: mpsc::Sender<PriceTick>,
    backoff: Backoff,
    ping_interval: Duration,
    stale_after: Duration,
}

impl TradeFeed {
    pub fn new(ws_url: &str, coin: &str, tx: mpsc::Sender<PriceTick>) -> Self {
        Self {
            ws_url: ws_url.to_owned(),
            coin: coin.to_owned(),
            tx,
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
            ping_interval: PING_INTERVAL,
            stale_after: STALE_AFTER,
        }
    }

    pub fn with_timing(mut self, ping_interval: Duration, stale_after: Duration) -> Self {
        self.ping_interval = ping_interval;
        self.stale_after = stale_after;
        self
    }

    /// Run sessions until shutdown.  Only a dropped receiver is fatal.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<(), FeedError> {
        while !shutdown.is_triggered() {
            let reason = match self.session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Dropped { healthy, reason }) => {
                    if healthy {
                        self.backoff.reset();
                    }
                    reason
                }
                Err(FeedError::ReceiverDropped) => return Err(FeedError::ReceiverDropped),
                Err(e) => e,
            };
            let delay = self.backoff.next_delay();
            warn!(
                "{} trade feed down ({}), reconnect #{} in {:?}",
                self.coin,
                reason,
                self.backoff.attempts(),
                delay
            );
            if !shutdown.sleep(delay).await {
                break;
            }
        }
        info!("{} trade feed stopped", self.coin);
        Ok(())
    }

    async fn session(&self, shutdown: &mut ShutdownSignal) -> Result<SessionEnd, FeedError> {
        info!("Connecting to {} ({} trades)", self.ws_url, self.coin);
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.ws_url.as_str()))
            .await
            .map_err(|_| FeedError::ConnectTimeout(CONNECT_TIMEOUT))??;
        let (mut write, mut read) = ws.split();
        write.send(Message::Text(subscribe_message(&self.coin))).await?;
        info!("Subscribed to {} trades", self.coin);

        let mut ping = tokio::time::interval(self.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;
        // our own pings do not count as activity; only inbound frames push this out
        let stale = tokio::time::sleep(self.stale_after);
        tokio::pin!(stale);
        let mut delivered: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    // best-effort
                    let _ = write.send(Message::Text(unsubscribe_message(&self.coin))).await;
                    let _ = write.close().await;
                    info!("Unsubscribed from {} trades after {} ticks", self.coin, delivered);
                    return Ok(SessionEnd::Shutdown);
                }
                _ = ping.tick() => {
                    write.send(Message::Text(PING_MESSAGE.to_owned())).await?;
                }
                _ = &mut stale => {
                    return Ok(SessionEnd::Dropped { healthy: delivered > 0, reason: FeedError::Stale(self.stale_after) });
                }
                frame = read.next() => {
                    let Some(msg) = frame else {
                        return Ok(SessionEnd::Dropped { healthy: delivered > 0, reason: FeedError::Closed });
                    };
                    let msg = msg?;
                    stale.as_mut().reset(tokio::time::Instant::now() + self.stale_after);
                    let text = match msg {
                        Message::Text(t) => t,
                        Message::Binary(b) => match String::from_utf8(b) {
                            Ok(t) => t,
                            Err(_) => continue,
                        },
                        Message::Close(_) => {
                            return Ok(SessionEnd::Dropped { healthy: delivered > 0, reason: FeedError::Closed });
                        }
                        _ => continue,
                    };
                    match parse_message(&text, &self.coin) {
                        Ok(FeedMessage::Trades { ticks, .. }) => {
                            for tick in ticks {
                                self.tx.send(tick).await.map_err(|_| FeedError::ReceiverDropped)?;
                                delivered += 1;
                            }
                        }
                        Ok(FeedMessage::Pong) | Ok(FeedMessage::SubscriptionResponse) => {}
                        Ok(FeedMessage::Other(channel)) => debug!("Ignoring {} message", channel),
                        Err(e) => warn!("{}", e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_payload() {
        let v: Value = serde_json::from_str(&subscribe_message("ETH")).unwrap();
        assert_eq!(v, json!({"method": "subscribe", "subscription": {"type": "trades", "coin": "ETH"}}));
        let v: Value = serde_json::from_str(&unsubscribe_message("ETH")).unwrap();
        assert_eq!(v["method"], "unsubscribe");
    }

    #[test]
    fn trades_become_ticks() {
        let text = r#"{"channel":"trades","data":[
            {"coin":"BTC","side":"B","px":"67000.5","sz":"0.1","hash":"0x1","time":1700000000000,"tid":1,"users":["0xa","0xb"]},
            {"coin":"BTC","side":"A","px":"66999.0","sz":"0.2","hash":"0x2","time":1700000000100,"tid":2,"users":["0xa","0xb"]}
        ]}"#;
        let FeedMessage::Trades { ticks, skipped } = parse_message(text, "BTC").unwrap() else {
            panic!("expected trades");
        };
        assert_eq!(skipped, 0);
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].side, Some(OrderSide::Buy));
        assert_eq!(ticks[1].side, Some(OrderSide::Sell));
        assert_eq!(ticks[0].ts_ms, 1_700_000_000_000);
        assert!((ticks[0].notional - 6_700.05).abs() < 1e-6);
    }

    #[test]
    fn bad_entries_are_skipped() {
        let text = r#"{"channel":"trades","data":[
            {"coin":"BTC","side":"B","px":"oops","sz":"0.1","time":1},
            {"coin":"BTC","side":"B","sz":"0.1","time":2},
            {"coin":"ETH","side":"B","px":"3000","sz":"1","time":3},
            {"coin":"BTC","side":"A","px":"100","sz":"1","time":4}
        ]}"#;
        let FeedMessage::Trades { ticks, skipped } = parse_message(text, "BTC").unwrap() else {
            panic!("expected trades");
        };
        assert_eq!(skipped, 2);
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].price, 100.0);
    }

    #[test]
    fn control_channels() {
        assert_eq!(parse_message(r#"{"channel":"pong"}"#, "BTC").unwrap(), FeedMessage::Pong);
        assert_eq!(
            parse_message(r#"{"channel":"subscriptionResponse","data":{"method":"subscribe"}}"#, "BTC").unwrap(),
            FeedMessage::SubscriptionResponse
        );
        assert!(matches!(parse_message("not json", "BTC"), Err(FeedError::Protocol(_))));
    }

    #[test]
    fn coin_case_is_kept() {
        let (tx, _rx) = mpsc::channel(1);
        let feed = TradeFeed::new("ws://127.0.0.1:9/ws", "kPEPE", tx);
        assert_eq!(feed.coin, "kPEPE");
        let v: Value = serde_json::from_str(&subscribe_message(&feed.coin)).unwrap();
        assert_eq!(v["subscription"]["coin"], "kPEPE");
    }

    /// Accepts one client, reads its frames and never writes back.
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(sock).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });
        url
    }

    #[tokio::test]
    async fn quiet_server_goes_stale_despite_pings() {
        let url = silent_server().await;
        let (tx, _rx) = mpsc::channel(8);
        let (_shutdown, mut signal) = crate::schedule::Shutdown::new();
        let feed = TradeFeed::new(&url, "BTC", tx)
            .with_timing(Duration::from_millis(50), Duration::from_millis(300));
        let end = tokio::time::timeout(Duration::from_secs(5), feed.session(&mut signal))
            .await
            .expect("session should end on its own")
            .unwrap();
        assert!(matches!(
            end,
            SessionEnd::Dropped { healthy: false, reason: FeedError::Stale(d) } if d == Duration::from_millis(300)
        ));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_while_backing_off() {
        let (tx, _rx) = mpsc::channel(8);
        let (shutdown, signal) = crate::schedule::Shutdown::new();
        // unreachable endpoint: every session fails immediately
        let feed = TradeFeed::new("ws://127.0.0.1:9/ws", "BTC", tx);
        let handle = tokio::spawn(feed.run(signal));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
