use std::io::Write;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use super::config::Effective;
use super::domain::{FrameBuilder, Rng, split_point};
use super::error::FrameGenError;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// Frames per write. Two frames in one write exercise sticky reads.
const BATCH: u64 = 2;

// ═══════════════════════════════════════════════════════════════
//  Connection
// ═══════════════════════════════════════════════════════════════

struct Link {
    addr: String,
    stream: Option<TcpStream>,
}

impl Link {
    fn new(addr: &str) -> Self {
        Self { addr: addr.to_string(), stream: None }
    }

    /// Write `parts` in order; with more than one part each is flushed and
    /// followed by a short pause so the server sees separate reads.
    fn send(&mut self, parts: &[&[u8]]) -> std::io::Result<()> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.addr)?;
            stream.set_nodelay(true)?;
            tracing::info!(addr = %self.addr, "connected");
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        for (i, part) in parts.iter().enumerate() {
            stream.write_all(part)?;
            stream.flush()?;
            if i + 1 < parts.len() {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.stream = None;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Main loop
// ═══════════════════════════════════════════════════════════════

pub async fn run(args: &Effective) -> Result<(), FrameGenError> {
    let mut rng = Rng::new(args.seed);
    let mut builder = FrameBuilder::new(args.topics.clone(), args.payload_size);
    let mut link = Link::new(&args.addr);

    println!("Frame Generator");
    println!("  addr     : {}", args.addr);
    println!("  topics   : {}", args.topics.join(", "));
    println!("  payload  : {} bytes", args.payload_size);
    if args.rate > 0.0 {
        println!("  rate     : {:.1} frames/s", args.rate);
    }
    if args.count > 0 {
        println!("  count    : {}", args.count);
    }
    if args.fragment {
        println!("  fragment : yes");
    }
    println!();

    let mut ticker = (args.rate > 0.0)
        .then(|| tokio::time::interval(Duration::from_secs_f64(BATCH as f64 / args.rate)));

    let mut buf = Vec::new();
    let mut sent = 0u64;
    let mut batch_no = 0u64;
    let start = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while args.count == 0 || sent < args.count {
        tokio::select! {
            biased;
            res = &mut ctrl_c => { res?; break; }
            _ = pace(&mut ticker) => {}
        }

        let frames = match args.count {
            0 => BATCH,
            n => BATCH.min(n - sent),
        };
        buf.clear();
        for i in 0..frames {
            builder.push_frame(sent + i + 1, &mut rng, &mut buf)?;
        }

        let cut = if args.fragment && batch_no % 2 == 1 {
            split_point(buf.len(), &mut rng)
        } else {
            None
        };
        let result = match cut {
            Some(at) => link.send(&[&buf[..at], &buf[at..]]),
            None => link.send(&[buf.as_slice()]),
        };

        match result {
            Ok(()) => {
                sent += frames;
                batch_no += 1;
                if sent % 1000 < frames {
                    let elapsed = start.elapsed();
                    eprint!("\r  {sent} sent ({:.1} frames/s)", sent as f64 / elapsed.as_secs_f64());
                }
            }
            Err(e) => {
                tracing::warn!(addr = %args.addr, error = %e, "send error, reconnecting");
                link.reset();
                tokio::select! {
                    res = &mut ctrl_c => { res?; break; }
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }

    let elapsed = start.elapsed();
    println!(
        "\n  done: {sent} frames in {:.1}s ({:.1} frames/s)",
        elapsed.as_secs_f64(),
        sent as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}

/// Wait for the next rate tick; unthrottled runs only yield so Ctrl+C is
/// still polled.
async fn pace(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => tokio::task::yield_now().await,
    }
}
