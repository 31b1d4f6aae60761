// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

#![warn(missing_docs)]

//! Node Exporter Launcher configures and starts a Prometheus exporter for
//! Linux host metrics.
//!
//! Embedding applications fill in a [`Config`] and call [`start`] on a
//! dedicated thread, or [`run`] from an existing tokio runtime.

mod collector;
mod config;
mod libc;
mod logger;
mod metric;
mod process;
mod server;
mod webconfig;

pub use config::{Config, parse_args};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};

fn build_context() -> String {
    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    format!(
        "target={}-{}, profile={profile}",
        std::env::consts::ARCH,
        std::env::consts::OS
    )
}

/// Starts the exporter and serves requests until a fatal error.
///
/// Unset fields of `config` are defaulted first.
pub async fn run(mut config: Config) -> Result<()> {
    config.apply_defaults();

    if let Err(err) = logger::init(&config.log_level, &config.log_format) {
        logger::init(config::DEFAULT_LOG_LEVEL, config::DEFAULT_LOG_FORMAT)?;
        return Err(err.context("failed to initialize logger"));
    }

    info!("starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("build context: {}", build_context());

    if libc::is_root() {
        warn!(
            "node exporter is running as root user; it is recommended to run it as an unprivileged user"
        );
    }

    let collector =
        collector::NodeCollector::new(&config).context("failed to initialize collectors")?;
    let web_config = webconfig::WebConfig::load(&config.config_file)?;
    if web_config.tls_enabled() {
        info!("TLS is enabled");
    }

    let port = u16::try_from(config.listen_port)
        .map_err(|_| anyhow!("invalid listen port {}", config.listen_port))?;
    let server = server::Server::bind(&server::listen_addrs(port), &config, &web_config, collector)
        .await
        .context("failed to start web server")?;
    server.serve().await
}

/// Runs the exporter on a new tokio runtime, blocking the calling
/// thread.  Exits the process with status 1 on a fatal error.
pub fn start(config: Config) {
    let res = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")
        .and_then(|rt| rt.block_on(run(config)));

    if let Err(err) = res {
        error!("{err:?}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config(f: impl FnOnce(&mut Config)) -> Config {
        let mut config = Config {
            disable_default_collectors: true,
            enable_collectors: vec!["time".into()],
            ..Default::default()
        };
        f(&mut config);
        config
    }

    async fn run_err(config: Config) -> String {
        let err = run(config).await.unwrap_err();
        format!("{err:#}")
    }

    #[test]
    fn build_context_names_target() {
        let context = build_context();
        assert!(context.contains(std::env::consts::ARCH));
        assert!(context.contains("profile="));
    }

    #[tokio::test]
    async fn port_out_of_range() {
        let err = run_err(quiet_config(|config| config.listen_port = 70000)).await;
        assert!(err.contains("invalid listen port 70000"), "{err}");
    }

    #[tokio::test]
    async fn invalid_log_level() {
        let err = run_err(quiet_config(|config| config.log_level = "verbose".into())).await;
        assert!(err.contains("failed to initialize logger"), "{err}");
        assert!(err.contains("unrecognized log level"), "{err}");
    }

    #[tokio::test]
    async fn invalid_log_format() {
        let err = run_err(quiet_config(|config| config.log_format = "xml".into())).await;
        assert!(err.contains("unrecognized log format"), "{err}");
    }

    #[tokio::test]
    async fn unknown_collector() {
        let err = run_err(quiet_config(|config| {
            config.enable_collectors = vec!["gpu".into()];
        }))
        .await;
        assert!(err.contains("failed to initialize collectors"), "{err}");
        assert!(err.contains("unknown collector \"gpu\""), "{err}");
    }

    #[tokio::test]
    async fn missing_web_config() {
        let err = run_err(quiet_config(|config| {
            config.config_file = "/does/not/exist/web.yml".into();
        }))
        .await;
        assert!(err.contains("failed to read web config"), "{err}");
    }

    #[tokio::test]
    async fn invalid_web_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.yml");
        std::fs::write(&path, "no_such_section: {}\n").unwrap();

        let err = run_err(quiet_config(|config| {
            config.config_file = path.to_str().unwrap().into();
        }))
        .await;
        assert!(err.contains("invalid web config"), "{err}");
    }
}
