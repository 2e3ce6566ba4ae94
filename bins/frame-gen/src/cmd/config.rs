use clap::Args;

use framing::MAX_FRAME_BYTES;

use super::error::FrameGenError;

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct GenArgs {
    /// Адрес ingest-сервера
    #[arg(long, default_value = "127.0.0.1:9000", env = "FRAME_GEN_ADDR")]
    pub addr: String,

    /// Топики через запятую, выбираются случайно
    #[arg(long, default_value = "events")]
    pub topics: String,

    /// Сколько фреймов отправить (0 = бесконечно)
    #[arg(long, default_value_t = 0)]
    pub count: u64,

    /// Фреймов в секунду (0 = без ограничения)
    #[arg(long, default_value_t = 0.0)]
    pub rate: f64,

    /// Размер payload в байтах
    #[arg(long, default_value_t = 64)]
    pub payload_size: usize,

    /// Резать каждую вторую пачку на две записи
    #[arg(long)]
    pub fragment: bool,

    /// Seed для PRNG (0 = текущее время)
    #[arg(long, default_value_t = 0)]
    pub seed: i64,
}

// ═══════════════════════════════════════════════════════════════
//  Effective — validated args
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Effective {
    pub addr: String,
    pub topics: Vec<String>,
    pub count: u64,
    pub rate: f64,
    pub payload_size: usize,
    pub fragment: bool,
    pub seed: i64,
}

impl Effective {
    pub fn new(args: &GenArgs) -> Result<Self, FrameGenError> {
        let topics: Vec<String> = args
            .topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if topics.is_empty() {
            return Err(FrameGenError::Config("--topics must name at least one topic".into()));
        }

        let longest = topics.iter().map(String::len).max().unwrap_or(0);
        if longest > u16::MAX as usize {
            return Err(FrameGenError::Config(format!("topic longer than {} bytes", u16::MAX)));
        }
        if 2 + longest + args.payload_size > MAX_FRAME_BYTES as usize {
            return Err(FrameGenError::Config(format!(
                "--payload-size {} exceeds the {MAX_FRAME_BYTES}-byte frame limit",
                args.payload_size
            )));
        }
        if !(args.rate >= 0.0 && args.rate.is_finite()) {
            return Err(FrameGenError::Config("--rate must be a finite number >= 0".into()));
        }

        Ok(Self {
            addr: args.addr.clone(),
            topics,
            count: args.count,
            rate: args.rate,
            payload_size: args.payload_size,
            fragment: args.fragment,
            seed: args.seed,
        })
    }
}
