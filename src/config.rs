use crate::error::Error;

/// Startup configuration for a capture run.
///
/// ```
/// use mysql_capture::config::{CaptureConfig, LogLevel};
///
/// let mut cfg = CaptureConfig::default();
/// cfg.port = 3306;
/// assert_eq!(cfg.level, LogLevel::Info);
/// ```
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Network interface to open in promiscuous mode (e.g. `lo0`, `eth0`).
    pub device: String,

    /// MySQL server port; also the BPF filter's `tcp port` and `dst port`.
    pub port: u16,

    pub level: LogLevel,

    /// Number of shards. Defaults to `max(1, num_cpus / 4)` when unset.
    pub shard_count: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "lo0".to_string(),
            port: 3306,
            level: LogLevel::Info,
            shard_count: None,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 {
            return Err(Error::BadConfig("port must be non-zero".to_string()));
        }
        Ok(())
    }

    /// The number of shards this configuration resolves to.
    pub fn resolved_shard_count(&self) -> usize {
        self.shard_count.unwrap_or_else(default_shard_count)
    }

    /// The literal BPF filter installed on the capture handle (§6).
    pub fn bpf_filter(&self) -> String {
        format!("tcp port {} and dst port {}", self.port, self.port)
    }
}

/// `max(1, ncpu/4)`, matching the reference implementation's shard heuristic.
pub fn default_shard_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    (cpus / 4).max(1)
}

impl TryFrom<&[String]> for CaptureConfig {
    type Error = Error;

    /// Minimal flag parsing for `capture --device <name> --port <int> --level info|debug`.
    /// A full argument-parsing crate is out of scope for this entry point.
    fn try_from(args: &[String]) -> Result<Self, Self::Error> {
        let mut cfg = Self::default();
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let value = iter
                .next()
                .ok_or_else(|| Error::BadConfig(format!("missing value for {flag}")))?;
            match flag.as_str() {
                "--device" => cfg.device = value.clone(),
                "--port" => {
                    cfg.port = value
                        .parse()
                        .map_err(|_| Error::BadConfig(format!("invalid port: {value}")))?;
                }
                "--level" => {
                    cfg.level = match value.as_str() {
                        "info" => LogLevel::Info,
                        "debug" => LogLevel::Debug,
                        other => {
                            return Err(Error::BadConfig(format!("invalid level: {other}")));
                        }
                    };
                }
                other => return Err(Error::BadConfig(format!("unknown flag: {other}"))),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
