//! Shared request state and startup wiring.
//!
//! Bootstrap loads the issuing CA's certificate and key, registers the
//! key with the signer backend, and makes sure the store holds the CA's
//! public key and CA rows. Startup is idempotent: restarting against a
//! store that already holds the rows reuses them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use der::{Decode, Encode};
use sigil_db::models::{NewCa, NewPublicKey};
use sigil_db::storage::{CaFilter, CaStore, PublicKeyFilter, PublicKeyStore, Storage, StoreError};
use tracing::info;
use x509_cert::Certificate;

use crate::cmc::CmcHandler;
use crate::config::SigilApiConfig;
use crate::signer::soft::SoftSigner;
use crate::trust::TrustStore;

#[derive(Clone)]
pub struct ApiContext {
    pub db: Arc<dyn Storage>,
    pub cmc: Arc<CmcHandler>,
}

impl ApiContext {
    pub async fn bootstrap(
        config: &SigilApiConfig,
        db: Arc<dyn Storage>,
    ) -> anyhow::Result<Self> {
        let ca_pem = std::fs::read_to_string(&config.ca_cert_file)
            .with_context(|| format!("failed to read {}", config.ca_cert_file.display()))?;
        let ca_key_pem = std::fs::read_to_string(&config.ca_key_file)
            .with_context(|| format!("failed to read {}", config.ca_key_file.display()))?;
        let trust_pem = std::fs::read_to_string(&config.cmc_trust_file)
            .with_context(|| format!("failed to read {}", config.cmc_trust_file.display()))?;

        let signer = Arc::new(SoftSigner::new());
        signer
            .load_key_pem(&config.ca_key_label, &ca_key_pem)
            .map_err(|e| anyhow::anyhow!("failed to load ca key: {e}"))?;

        let trust = TrustStore::from_pem_bundle(&trust_pem)
            .map_err(|e| anyhow::anyhow!("failed to parse cmc trust bundle: {e}"))?;
        info!(entries = trust.len(), "loaded cmc trust bundle");

        let ca_der = sigil_common::x509::decode_pem(&ca_pem, "CERTIFICATE")
            .map_err(|e| anyhow::anyhow!("failed to parse ca certificate: {e}"))?;
        let ca_cert = Certificate::from_der(&ca_der)
            .map_err(|e| anyhow::anyhow!("failed to parse ca certificate: {e}"))?;

        let ca_serial = ensure_ca_rows(&*db, &ca_cert, &ca_pem, &config.ca_key_label).await?;

        let cmc = Arc::new(CmcHandler::new(
            db.clone(),
            signer,
            trust,
            ca_cert,
            ca_serial,
            config.ca_key_label.clone(),
            Duration::from_secs(config.signer_timeout_secs),
            config.cert_validity_days,
        ));

        Ok(Self { db, cmc })
    }
}

/// Save the CA's public key and CA rows, or find them from a previous run.
async fn ensure_ca_rows(
    db: &dyn Storage,
    ca_cert: &Certificate,
    ca_pem: &str,
    key_label: &str,
) -> anyhow::Result<i64> {
    let spki_der = ca_cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| anyhow::anyhow!("failed to encode ca public key: {e}"))?;
    let spki_pem = pem_rfc7468::encode_string("PUBLIC KEY", pem_rfc7468::LineEnding::LF, &spki_der)
        .map_err(|e| anyhow::anyhow!("failed to encode ca public key: {e}"))?;

    let public_key = match PublicKeyStore::create(
        db,
        NewPublicKey::from_pem(&spki_pem, true).map_err(|e| anyhow::anyhow!("bad ca key: {e}"))?,
    )
    .await
    {
        Ok(row) => row.serial,
        Err(StoreError::DuplicateValue { .. }) => PublicKeyStore::list(
            db,
            PublicKeyFilter {
                pem: Some(spki_pem),
                ..Default::default()
            },
        )
        .await?
        .into_iter()
        .next()
        .context("ca public key row vanished")?
        .serial,
        Err(err) => return Err(err.into()),
    };

    let ca_serial = match CaStore::create(
        db,
        NewCa::from_pem(ca_pem, key_label, public_key)
            .map_err(|e| anyhow::anyhow!("bad ca certificate: {e}"))?,
    )
    .await
    {
        Ok(row) => {
            info!(ca = row.serial, key_label, "registered issuing ca");
            row.serial
        }
        Err(StoreError::DuplicateValue { .. }) => CaStore::list(
            db,
            CaFilter {
                pem: Some(ca_pem.to_string()),
                ..Default::default()
            },
        )
        .await?
        .into_iter()
        .next()
        .context("ca row vanished")?
        .serial,
        Err(err) => return Err(err.into()),
    };

    Ok(ca_serial)
}

#[cfg(test)]
mod tests {
    use sigil_db::storage::memory::MemoryStorage;

    use super::*;

    const CA_KEY: [u8; 32] = [
        0x7d, 0x50, 0x63, 0x6f, 0x84, 0x21, 0x35, 0xe4, 0x42, 0x9b, 0x57, 0xf6, 0x48, 0xb3,
        0x06, 0x61, 0xd9, 0x3c, 0xa5, 0x8e, 0xf7, 0x64, 0xb2, 0x39, 0x0b, 0x78, 0x1a, 0xc5,
        0x3d, 0xe0, 0x94, 0x46,
    ];

    async fn ca_fixture() -> (Certificate, String) {
        use std::str::FromStr;

        use p256::ecdsa::{SigningKey, VerifyingKey};
        use p256::pkcs8::EncodePublicKey;
        use x509_cert::name::Name;

        use crate::signer::{CertTemplate, Signer};

        let key = SigningKey::from_slice(&CA_KEY).unwrap();
        let signer = SoftSigner::new();
        signer.insert_key("boot", key.clone());

        let name = Name::from_str("CN=Bootstrap Test Root").unwrap();
        let pem = signer
            .sign_certificate(
                "boot",
                &CertTemplate {
                    subject: name.clone(),
                    issuer: name,
                    spki_der: VerifyingKey::from(&key)
                        .to_public_key_der()
                        .unwrap()
                        .as_bytes()
                        .to_vec(),
                    validity_days: 30,
                },
            )
            .await
            .unwrap();
        let der = sigil_common::x509::decode_pem(&pem, "CERTIFICATE").unwrap();
        (Certificate::from_der(&der).unwrap(), pem)
    }

    #[tokio::test]
    async fn bootstrap_rows_are_idempotent() {
        let db = MemoryStorage::new();
        let (ca_cert, ca_pem) = ca_fixture().await;

        let first = ensure_ca_rows(&db, &ca_cert, &ca_pem, "boot").await.unwrap();
        let second = ensure_ca_rows(&db, &ca_cert, &ca_pem, "boot").await.unwrap();
        assert_eq!(first, second);

        let cas = CaStore::list(&db, CaFilter::default()).await.unwrap();
        assert_eq!(cas.len(), 1);
        assert_eq!(cas[0].key_label, "boot");
    }
}
