use clap::Parser;
use std::{net::SocketAddr, path::PathBuf};

#[derive(Clone, Debug, Parser)]
pub struct SigilApiConfig {
    #[clap(
        short,
        long,
        env = "SIGIL_API_BIND_ADDR",
        default_value = "0.0.0.0:8005"
    )]
    pub bind_addr: SocketAddr,

    #[clap(long, default_value_t = false)]
    pub dump_openapi: bool,

    /// Path to the issuing CA certificate (PEM format).
    #[clap(long, env = "SIGIL_API_CA_CERT_FILE")]
    pub ca_cert_file: PathBuf,

    /// Path to the issuing CA private key (PEM-encoded PKCS#8).
    ///
    /// Generate one using:
    /// ```bash
    /// openssl genpkey -algorithm EC -pkeyopt ec_paramgen_curve:P-256 -out ca_key.pem
    /// ```
    #[clap(long, env = "SIGIL_API_CA_KEY_FILE")]
    pub ca_key_file: PathBuf,

    /// Key handle the issuing CA's private key is registered under in the
    /// signer backend.
    #[clap(long, env = "SIGIL_API_CA_KEY_LABEL", default_value = "sigil-root")]
    pub ca_key_label: String,

    /// Path to the PEM bundle of certificates allowed to sign CMC requests.
    #[clap(long, env = "SIGIL_API_CMC_TRUST_FILE")]
    pub cmc_trust_file: PathBuf,

    /// Upper bound on any single signer backend call, in seconds.
    #[clap(long, env = "SIGIL_API_SIGNER_TIMEOUT_SECS", default_value_t = 10)]
    pub signer_timeout_secs: u64,

    /// Validity window of certificates issued over CMC, in days.
    #[clap(long, env = "SIGIL_API_CERT_VALIDITY_DAYS", default_value_t = 365)]
    pub cert_validity_days: u64,
}
