// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! TLS for warehouse sessions.

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use postgres_openssl::MakeTlsConnector;
use serde::Deserialize;
use tokio_postgres::config::SslMode;

/// An error building a TLS connector.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Any other error we bail on.
    #[error(transparent)]
    Generic(#[from] anyhow::Error),
    #[error(transparent)]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

/// libpq's `sslmode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    Disable,
    Prefer,
    #[default]
    Require,
    VerifyCa,
    VerifyFull,
}

impl TlsMode {
    /// The mode tokio-postgres negotiates with. Certificate verification for
    /// the `verify-*` modes happens in the connector built by [`make_tls`].
    pub fn ssl_mode(&self) -> SslMode {
        match self {
            TlsMode::Disable => SslMode::Disable,
            TlsMode::Prefer => SslMode::Prefer,
            TlsMode::Require | TlsMode::VerifyCa | TlsMode::VerifyFull => SslMode::Require,
        }
    }
}

/// TLS settings for warehouse sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub mode: TlsMode,
    /// PEM-encoded root certificate, e.g. the Redshift CA bundle.
    pub root_cert: Option<Vec<u8>>,
}

/// Creates a TLS connector for the given settings.
///
/// Peer and hostname verification follow libpq's interpretation of
/// `sslmode`. Redshift clusters accept `require` out of the box; `verify-ca`
/// and `verify-full` need the Redshift CA bundle as the root certificate.
pub fn make_tls(config: &TlsConfig) -> Result<MakeTlsConnector, TlsError> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    let (verify_mode, verify_hostname) = match config.mode {
        TlsMode::Disable | TlsMode::Prefer => (SslVerifyMode::NONE, false),
        // With a root certificate, `require` behaves like `verify-ca`.
        TlsMode::Require => match config.root_cert {
            Some(_) => (SslVerifyMode::PEER, false),
            None => (SslVerifyMode::NONE, false),
        },
        TlsMode::VerifyCa => (SslVerifyMode::PEER, false),
        TlsMode::VerifyFull => (SslVerifyMode::PEER, true),
    };
    builder.set_verify(verify_mode);

    match &config.root_cert {
        Some(root_cert) => {
            for cert in X509::stack_from_pem(root_cert)? {
                builder.cert_store_mut().add_cert(cert)?;
            }
        }
        None if verify_mode == SslVerifyMode::PEER => {
            return Err(TlsError::Generic(anyhow::anyhow!(
                "sslmode {:?} requires a root certificate",
                config.mode
            )));
        }
        None => {}
    }

    let mut tls_connector = MakeTlsConnector::new(builder.build());
    if verify_mode == SslVerifyMode::PEER && !verify_hostname {
        tls_connector.set_callback(|connect, _| {
            connect.set_verify_hostname(false);
            Ok(())
        });
    }

    Ok(tls_connector)
}
