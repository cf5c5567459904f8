//! Live-stream demo: connect, subscribe to one symbol, log book tops and
//! trades as they arrive.
//!
//! ```text
//! STREAM_TOKEN=<jwt> cargo run --bin stream_demo -- ws://127.0.0.1:8080/stream BTC_USD
//! ```

use session::{Session, SessionConfig};
use std::env;
use std::sync::Arc;
use store::StateChange;
use transport::StaticToken;
use types::event::Channel;
use types::ids::Symbol;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/stream".to_string());
    let symbol = env::args().nth(2).unwrap_or_else(|| "BTC_USD".to_string());
    let token = env::var("STREAM_TOKEN").unwrap_or_default();

    let session = Session::new(SessionConfig::new(url, Arc::new(StaticToken(token))));

    // Store listeners run inside dispatch; forward changes to this task and
    // read projections here instead.
    let (changes_tx, mut changes_rx) = tokio::sync::mpsc::unbounded_channel();
    if let Ok(mut store) = session.store().lock() {
        store.on_state_change(move |change: &StateChange| {
            let _ = changes_tx.send(change.clone());
        });
    }

    session.transport().on_error(|err| {
        tracing::warn!(error = %err, "transport error");
    });

    session.connect().await?;
    tracing::info!(symbol = %symbol, "connected, subscribing");
    session.subscribe(Channel::MarketData, Some(&symbol)).await?;
    session.subscribe(Channel::Trades, Some(&symbol)).await?;

    let store = session.store();
    let symbol = Symbol::new(symbol);
    while let Some(change) = changes_rx.recv().await {
        let Ok(guard) = store.lock() else { break };
        match change {
            StateChange::Orderbook(changed) if changed == symbol => {
                if let Some(book) = guard.orderbook(&symbol) {
                    let bid = book.best_bid().map(|l| l.price.to_string());
                    let ask = book.best_ask().map(|l| l.price.to_string());
                    tracing::info!(
                        seq = book.last_seq.value(),
                        bid = bid.as_deref().unwrap_or("-"),
                        ask = ask.as_deref().unwrap_or("-"),
                        "book"
                    );
                }
            }
            StateChange::Trades(changed) if changed == symbol => {
                if let Some(trade) = guard.trades(&symbol).and_then(|tape| tape.latest()) {
                    tracing::info!(
                        price = %trade.price,
                        quantity = %trade.quantity,
                        side = ?trade.side,
                        "trade"
                    );
                }
            }
            StateChange::Ticker(changed) if changed == symbol => {
                if let Some(ticker) = guard.ticker(&symbol) {
                    tracing::info!(last = %ticker.last_price, volume = %ticker.volume_24h, "ticker");
                }
            }
            _ => {}
        }
    }

    Ok(())
}
