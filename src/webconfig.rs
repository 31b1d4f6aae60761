// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

//! Optional web configuration file enabling TLS, extra response headers
//! and basic authentication.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use hyper::header::{HeaderName, HeaderValue};
use log::debug;
use serde::Deserialize;
use std::{collections::HashMap, fs, io, path, sync};

const RESERVED_HEADERS: [&str; 5] = [
    "authorization",
    "authentication",
    "cookie",
    "set-cookie",
    "www-authenticate",
];

static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
enum TlsVersion {
    #[default]
    #[serde(rename = "TLS12")]
    Tls12,
    #[serde(rename = "TLS13")]
    Tls13,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TlsServerConfig {
    #[serde(default)]
    cert_file: path::PathBuf,
    #[serde(default)]
    key_file: path::PathBuf,
    #[serde(default)]
    min_version: TlsVersion,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpServerConfig {
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebConfig {
    tls_server_config: Option<TlsServerConfig>,
    #[serde(default)]
    http_server_config: HttpServerConfig,
    #[serde(default)]
    basic_auth_users: HashMap<String, String>,
}

impl WebConfig {
    /// Loads and validates the file at `path`.  An empty path yields a
    /// config with TLS and auth disabled.
    pub fn load(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Ok(WebConfig::default());
        }

        let path = path::Path::new(path);
        let s = fs::read_to_string(path)
            .with_context(|| format!("failed to read web config {path:?}"))?;
        let base = path.parent().unwrap_or(path::Path::new(""));

        Self::parse(&s, base).with_context(|| format!("invalid web config {path:?}"))
    }

    fn parse(s: &str, base: &path::Path) -> Result<Self> {
        let mut config: WebConfig = if s.trim().is_empty() {
            WebConfig::default()
        } else {
            serde_yaml::from_str(s)?
        };

        if let Some(tls) = &mut config.tls_server_config {
            if tls.cert_file.as_os_str().is_empty() {
                return Err(anyhow!("missing cert_file"));
            }
            if tls.key_file.as_os_str().is_empty() {
                return Err(anyhow!("missing key_file"));
            }
            tls.cert_file = base.join(&tls.cert_file);
            tls.key_file = base.join(&tls.key_file);
        }

        config.headers()?;

        Ok(config)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_server_config.is_some()
    }

    /// Builds the TLS acceptor, or returns `None` when TLS is disabled.
    pub fn tls_acceptor(&self) -> Result<Option<tokio_rustls::TlsAcceptor>> {
        let Some(tls) = &self.tls_server_config else {
            return Ok(None);
        };

        let certs = load_certs(&tls.cert_file)?;
        let key = load_key(&tls.key_file)?;

        let versions = match tls.min_version {
            TlsVersion::Tls12 => rustls::ALL_VERSIONS,
            TlsVersion::Tls13 => TLS13_ONLY,
        };
        let provider = sync::Arc::new(rustls::crypto::ring::default_provider());
        let mut server_config = rustls::ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(versions)
            .context("unsupported TLS versions")?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("invalid TLS certificate or key")?;
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        debug!("TLS enabled with {:?} minimum", tls.min_version);

        Ok(Some(tokio_rustls::TlsAcceptor::from(sync::Arc::new(
            server_config,
        ))))
    }

    /// Returns the extra headers to add to every response.
    pub fn headers(&self) -> Result<Vec<(HeaderName, HeaderValue)>> {
        let mut headers = Vec::with_capacity(self.http_server_config.headers.len());
        for (key, val) in &self.http_server_config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid header name {key:?}"))?;
            if RESERVED_HEADERS.contains(&name.as_str()) {
                return Err(anyhow!("header {key:?} cannot be configured"));
            }
            let val = HeaderValue::from_str(val)
                .with_context(|| format!("invalid value for header {key:?}"))?;
            headers.push((name, val));
        }
        headers.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        Ok(headers)
    }

    /// Returns the credential checker, or `None` when auth is disabled.
    pub fn basic_auth(&self) -> Option<BasicAuth> {
        if self.basic_auth_users.is_empty() {
            return None;
        }

        Some(BasicAuth {
            users: self.basic_auth_users.clone(),
        })
    }
}

fn load_certs(path: &path::Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let fp = fs::File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(fp))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {path:?}"))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificate in {path:?}"));
    }

    Ok(certs)
}

fn load_key(path: &path::Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let fp = fs::File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    rustls_pemfile::private_key(&mut io::BufReader::new(fp))
        .with_context(|| format!("failed to parse {path:?}"))?
        .ok_or_else(|| anyhow!("no private key in {path:?}"))
}

/// Verifies `Authorization: Basic` headers against bcrypt hashes.
#[derive(Clone, Debug)]
pub struct BasicAuth {
    users: HashMap<String, String>,
}

impl BasicAuth {
    fn credentials(header: &str) -> Option<(String, String)> {
        let (scheme, encoded) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;

        Some((user.to_string(), pass.to_string()))
    }

    /// Returns whether the `Authorization` header value names a known
    /// user with the right password.  Runs bcrypt, so it is slow.
    pub fn check(&self, header: Option<&str>) -> bool {
        let Some((user, pass)) = header.and_then(Self::credentials) else {
            return false;
        };
        let Some(hash) = self.users.get(&user) else {
            return false;
        };

        match bcrypt::verify(pass, hash) {
            Ok(valid) => valid,
            Err(err) => {
                debug!("failed to verify password of {user}: {err:?}");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, pass: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        format!("Basic {encoded}")
    }

    #[test]
    fn empty_path_disables_everything() {
        let config = WebConfig::load("").unwrap();
        assert!(!config.tls_enabled());
        assert!(config.tls_acceptor().unwrap().is_none());
        assert!(config.headers().unwrap().is_empty());
        assert!(config.basic_auth().is_none());
    }

    #[test]
    fn empty_file() {
        let config = WebConfig::parse("\n", path::Path::new("/etc")).unwrap();
        assert!(!config.tls_enabled());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(WebConfig::load("/does/not/exist/web.yml").is_err());
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let yaml = "\
tls_server_config:
  cert_file: server.crt
  key_file: /abs/server.key
";
        let config = WebConfig::parse(yaml, path::Path::new("/etc/exporter")).unwrap();
        let tls = config.tls_server_config.unwrap();
        assert_eq!(tls.cert_file, path::Path::new("/etc/exporter/server.crt"));
        assert_eq!(tls.key_file, path::Path::new("/abs/server.key"));
        assert_eq!(tls.min_version, TlsVersion::Tls12);
    }

    #[test]
    fn invalid_configs() {
        let base = path::Path::new("/");
        for yaml in [
            "tls_server_config:\n  cert_file: a.crt\n",
            "tls_server_config:\n  key_file: a.key\n",
            "tls_server_config:\n  cert_file: a\n  key_file: b\n  min_version: TLS11\n",
            "tls_server_config:\n  cert_file: a\n  key_file: b\n  client_ca_file: c\n",
            "unknown_section: {}\n",
            "http_server_config:\n  headers:\n    Set-Cookie: a=b\n",
            "http_server_config:\n  headers:\n    authorization: x\n",
            "http_server_config:\n  headers:\n    \"bad header\": x\n",
            "basic_auth_users: [alice]\n",
        ] {
            assert!(WebConfig::parse(yaml, base).is_err(), "{yaml}");
        }
    }

    #[test]
    fn custom_headers() {
        let yaml = "\
http_server_config:
  headers:
    X-Frame-Options: deny
    Strict-Transport-Security: max-age=31536000
";
        let config = WebConfig::parse(yaml, path::Path::new("/")).unwrap();
        let headers = config.headers().unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "strict-transport-security");
        assert_eq!(headers[0].1, "max-age=31536000");
        assert_eq!(headers[1].0, "x-frame-options");
        assert_eq!(headers[1].1, "deny");
    }

    #[test]
    fn tls_acceptor_from_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_tls_files(dir.path());
        let config_path = dir.path().join("web.yml");
        fs::write(
            &config_path,
            "tls_server_config:\n  cert_file: server.crt\n  key_file: server.key\n  min_version: TLS13\n",
        )
        .unwrap();

        let config = WebConfig::load(config_path.to_str().unwrap()).unwrap();
        assert!(config.tls_enabled());
        assert!(config.tls_acceptor().unwrap().is_some());
    }

    #[test]
    fn tls_acceptor_with_bad_pem() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server.crt"), "not a cert").unwrap();
        fs::write(dir.path().join("server.key"), testutil::KEY).unwrap();

        let yaml = "tls_server_config:\n  cert_file: server.crt\n  key_file: server.key\n";
        let config = WebConfig::parse(yaml, dir.path()).unwrap();
        assert!(config.tls_acceptor().is_err());

        let yaml = "tls_server_config:\n  cert_file: missing.crt\n  key_file: server.key\n";
        let config = WebConfig::parse(yaml, dir.path()).unwrap();
        assert!(config.tls_acceptor().is_err());
    }

    #[test]
    fn basic_auth_check() {
        let hash = bcrypt::hash("secret", 4).unwrap();
        let yaml = format!("basic_auth_users:\n  alice: '{hash}'\n");
        let config = WebConfig::parse(&yaml, path::Path::new("/")).unwrap();
        let auth = config.basic_auth().unwrap();

        assert!(auth.check(Some(&basic("alice", "secret"))));
        assert!(auth.check(Some(&basic("alice", "secret").replace("Basic", "basic"))));
        assert!(!auth.check(Some(&basic("alice", "wrong"))));
        assert!(!auth.check(Some(&basic("bob", "secret"))));
        assert!(!auth.check(Some("Bearer abc")));
        assert!(!auth.check(Some("Basic !!!")));
        assert!(!auth.check(None));
    }

    #[test]
    fn password_may_contain_colons() {
        let hash = bcrypt::hash("a:b", 4).unwrap();
        let auth = BasicAuth {
            users: HashMap::from([("alice".to_string(), hash)]),
        };
        assert!(auth.check(Some(&basic("alice", "a:b"))));
    }
}
