use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "funnelpot: multi-port HTTP funnel honeypot")]
pub struct Cli {
    /// Ports to expose: a file of newline-separated ports, or a range "8000-8100"
    #[arg(short = 'p', long)]
    pub ports: String,

    /// Path to config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Public address to advertise (skips discovery)
    #[arg(long)]
    pub public_ip: Option<String>,

    /// Where to write the generated Caddyfile
    #[arg(long)]
    pub caddyfile: Option<PathBuf>,

    /// Directory for capture records
    #[arg(long)]
    pub capture_dir: Option<PathBuf>,

    /// Print the ports that would be exposed and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Metrics / health server bind address (host:port). If unset, disabled.
    #[arg(long)]
    pub metrics_addr: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct FileConfig {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub reserved_low: Option<u16>,
    pub reserved_high: Option<u16>,
    pub capture_dir: Option<String>,
    pub caddyfile_path: Option<String>,
    pub public_ip: Option<String>,
    pub ip_api_url: Option<String>,
    pub read_timeout_seconds: Option<u64>,
    pub metrics_addr: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub reserved_low: u16,
    pub reserved_high: u16,
    pub capture_dir: PathBuf,
    pub caddyfile_path: PathBuf,
    pub public_ip: Option<String>,
    pub ip_api_url: String,
    pub read_timeout_seconds: u64,
    pub metrics_addr: Option<String>,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        // Load file config: explicit --config, otherwise auto-detect ./funnelpot.toml
        let file_cfg: Option<FileConfig> = if let Some(path) = &cli.config {
            let s = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Some(toml::from_str(&s).with_context(|| "parsing config file")?)
        } else {
            let default_path = PathBuf::from("./funnelpot.toml");
            if default_path.exists() {
                let s = fs::read_to_string(&default_path)
                    .with_context(|| format!("reading config {}", default_path.display()))?;
                Some(toml::from_str(&s).with_context(|| "parsing config file")?)
            } else {
                // First run experience: create a default funnelpot.toml
                let template = r#"# funnelpot configuration
# Where the capture listener binds; Caddy forwards every exposed port here.
listen_host = "127.0.0.1"
listen_port = 65111
# Ports set aside for the listener itself; never exposed.
reserved_low = 65111
reserved_high = 65222
capture_dir = "dump/http"
caddyfile_path = "Caddyfile"
# Discovered via ip_api_url when unset.
# public_ip = "203.0.113.5"
ip_api_url = "https://api.ipify.org?format=json"
read_timeout_seconds = 30
# metrics_addr = "127.0.0.1:9100"
"#;
                let _ = fs::write(&default_path, template);
                None
            }
        };

        let listen_host = file_cfg
            .as_ref()
            .and_then(|f| f.listen_host.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let listen_port = file_cfg.as_ref().and_then(|f| f.listen_port).unwrap_or(65111);

        let reserved_low = file_cfg.as_ref().and_then(|f| f.reserved_low).unwrap_or(65111);
        let reserved_high = file_cfg.as_ref().and_then(|f| f.reserved_high).unwrap_or(65222);
        if reserved_low > reserved_high {
            anyhow::bail!("reserved range is inverted: {}-{}", reserved_low, reserved_high);
        }

        let capture_dir = cli
            .capture_dir
            .clone()
            .or_else(|| file_cfg.as_ref().and_then(|f| f.capture_dir.clone().map(PathBuf::from)))
            .unwrap_or_else(|| PathBuf::from("dump/http"));

        let caddyfile_path = cli
            .caddyfile
            .clone()
            .or_else(|| {
                file_cfg
                    .as_ref()
                    .and_then(|f| f.caddyfile_path.clone().map(PathBuf::from))
            })
            .unwrap_or_else(|| PathBuf::from("Caddyfile"));

        // Public address: CLI overrides file; None means discover at startup
        let public_ip = cli
            .public_ip
            .clone()
            .or_else(|| file_cfg.as_ref().and_then(|f| f.public_ip.clone()));

        let ip_api_url = file_cfg
            .as_ref()
            .and_then(|f| f.ip_api_url.clone())
            .unwrap_or_else(|| "https://api.ipify.org?format=json".to_string());

        let read_timeout_seconds = file_cfg
            .as_ref()
            .and_then(|f| f.read_timeout_seconds)
            .unwrap_or(30);

        let metrics_addr = cli
            .metrics_addr
            .clone()
            .or_else(|| file_cfg.as_ref().and_then(|f| f.metrics_addr.clone()));

        Ok(Config {
            listen_host,
            listen_port,
            reserved_low,
            reserved_high,
            capture_dir,
            caddyfile_path,
            public_ip,
            ip_api_url,
            read_timeout_seconds,
            metrics_addr,
        })
    }

    /// Address the capture listener binds; also the reverse_proxy target
    /// every generated route points at.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn reserved_range(&self) -> RangeInclusive<u16> {
        self.reserved_low..=self.reserved_high
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

// Internal convenience builder (exposed for integration tests)
impl Config {
    pub fn test_builder() -> TestConfigBuilder {
        TestConfigBuilder::default()
    }
}

#[derive(Default)]
#[doc(hidden)]
pub struct TestConfigBuilder {
    listen_host: Option<String>,
    listen_port: Option<u16>,
    reserved_low: Option<u16>,
    reserved_high: Option<u16>,
    capture_dir: Option<PathBuf>,
    caddyfile_path: Option<PathBuf>,
    public_ip: Option<String>,
    ip_api_url: Option<String>,
    read_timeout_seconds: Option<u64>,
    metrics_addr: Option<String>,
}

impl TestConfigBuilder {
    pub fn listen_host<S: Into<String>>(mut self, s: S) -> Self {
        self.listen_host = Some(s.into());
        self
    }
    pub fn listen_port(mut self, p: u16) -> Self {
        self.listen_port = Some(p);
        self
    }
    pub fn reserved_range(mut self, low: u16, high: u16) -> Self {
        self.reserved_low = Some(low);
        self.reserved_high = Some(high);
        self
    }
    pub fn capture_dir<P: Into<PathBuf>>(mut self, p: P) -> Self {
        self.capture_dir = Some(p.into());
        self
    }
    pub fn caddyfile_path<P: Into<PathBuf>>(mut self, p: P) -> Self {
        self.caddyfile_path = Some(p.into());
        self
    }
    pub fn public_ip<S: Into<String>>(mut self, s: S) -> Self {
        self.public_ip = Some(s.into());
        self
    }
    pub fn ip_api_url<S: Into<String>>(mut self, s: S) -> Self {
        self.ip_api_url = Some(s.into());
        self
    }
    pub fn read_timeout_seconds(mut self, v: u64) -> Self {
        self.read_timeout_seconds = Some(v);
        self
    }
    pub fn metrics_addr<S: Into<String>>(mut self, s: S) -> Self {
        self.metrics_addr = Some(s.into());
        self
    }
    pub fn build(self) -> Config {
        Config {
            listen_host: self.listen_host.unwrap_or_else(|| "127.0.0.1".into()),
            listen_port: self.listen_port.unwrap_or(65111),
            reserved_low: self.reserved_low.unwrap_or(65111),
            reserved_high: self.reserved_high.unwrap_or(65222),
            capture_dir: self.capture_dir.unwrap_or_else(|| PathBuf::from("dump/http")),
            caddyfile_path: self
                .caddyfile_path
                .unwrap_or_else(|| PathBuf::from("Caddyfile")),
            public_ip: self.public_ip,
            ip_api_url: self
                .ip_api_url
                .unwrap_or_else(|| "https://api.ipify.org?format=json".into()),
            read_timeout_seconds: self.read_timeout_seconds.unwrap_or(30),
            metrics_addr: self.metrics_addr,
        }
    }
}
