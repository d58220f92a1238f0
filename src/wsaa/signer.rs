//! CMS signing of login ticket requests.
//!
//! The authority requires the TRA to be wrapped in a CMS/PKCS#7 `SignedData`
//! structure signed with the X.509 certificate and RSA key it issued to the
//! taxpayer, DER-encoded and then base64'd into the SOAP call.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    pkcs7::{Pkcs7, Pkcs7Flags},
    pkey::{PKey, Private},
    stack::Stack,
    x509::X509,
};

use crate::{
    config::MasterConfig,
    error::{AfipError, Result},
};

/// Signs login ticket requests with the taxpayer's certificate.
///
/// Stateless apart from the parsed key material; construction validates the
/// material so signing failures surface before any network work.
pub struct CmsSigner {
    certificate: X509,
    private_key: PKey<Private>,
}

impl CmsSigner {
    /// Parses and cross-checks PEM certificate and private key.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::Signing`] if either PEM is malformed or the
    /// certificate's public key does not match the private key.
    pub fn from_pem(certificate_pem: &[u8], private_key_pem: &[u8]) -> Result<Self> {
        let certificate = X509::from_pem(certificate_pem)
            .map_err(|e| AfipError::Signing(format!("invalid certificate PEM: {e}")))?;
        let private_key = PKey::private_key_from_pem(private_key_pem)
            .map_err(|e| AfipError::Signing(format!("invalid private key PEM: {e}")))?;

        let public_key = certificate
            .public_key()
            .map_err(|e| AfipError::Signing(format!("cannot extract certificate public key: {e}")))?;
        if !public_key.public_eq(&private_key) {
            return Err(AfipError::Signing(
                "certificate does not match private key".to_owned(),
            ));
        }

        Ok(Self { certificate, private_key })
    }

    /// Builds a signer from the process's master configuration.
    ///
    /// # Errors
    ///
    /// See [`CmsSigner::from_pem`].
    pub fn from_config(config: &MasterConfig) -> Result<Self> {
        Self::from_pem(&config.certificate_pem, &config.private_key_pem)
    }

    /// Produces the base64-encoded DER CMS signature over `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`AfipError::Signing`] if the CMS structure cannot be built.
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        let extra_certs = Stack::new()
            .map_err(|e| AfipError::Signing(format!("cannot allocate certificate stack: {e}")))?;
        let signed = Pkcs7::sign(
            &self.certificate,
            &self.private_key,
            &extra_certs,
            payload,
            Pkcs7Flags::BINARY,
        )
        .map_err(|e| AfipError::Signing(format!("CMS signing failed: {e}")))?;
        let der = signed
            .to_der()
            .map_err(|e| AfipError::Signing(format!("CMS DER encoding failed: {e}")))?;
        Ok(STANDARD.encode(der))
    }
}

impl fmt::Debug for CmsSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmsSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use openssl::{
        asn1::Asn1Time,
        hash::MessageDigest,
        rsa::Rsa,
        x509::{X509Builder, X509NameBuilder},
    };

    use super::*;

    fn generate_key() -> PKey<Private> {
        let rsa = Rsa::generate(2048).unwrap();
        PKey::from_rsa(rsa).unwrap()
    }

    fn self_signed_cert(key: &PKey<Private>) -> X509 {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "afip-ws test").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
        builder.sign(key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    fn pem_pair() -> (Vec<u8>, Vec<u8>) {
        let key = generate_key();
        let cert = self_signed_cert(&key);
        (cert.to_pem().unwrap(), key.private_key_to_pem_pkcs8().unwrap())
    }

    #[test]
    fn test_sign_produces_base64_der() {
        let (cert_pem, key_pem) = pem_pair();
        let signer = CmsSigner::from_pem(&cert_pem, &key_pem).unwrap();

        let blob = signer.sign(b"<loginTicketRequest/>").unwrap();
        assert!(!blob.is_empty());
        let der = STANDARD.decode(&blob).expect("signature should be valid base64");
        // DER SEQUENCE tag.
        assert_eq!(der[0], 0x30);
    }

    #[test]
    fn test_malformed_certificate_is_signing_failure() {
        let (_, key_pem) = pem_pair();
        let err = CmsSigner::from_pem(b"not a certificate", &key_pem).unwrap_err();
        assert!(matches!(err, AfipError::Signing(msg) if msg.contains("certificate")));
    }

    #[test]
    fn test_malformed_key_is_signing_failure() {
        let (cert_pem, _) = pem_pair();
        let err = CmsSigner::from_pem(&cert_pem, b"not a key").unwrap_err();
        assert!(matches!(err, AfipError::Signing(msg) if msg.contains("private key")));
    }

    #[test]
    fn test_mismatched_pair_is_rejected() {
        let (cert_pem, _) = pem_pair();
        let other_key = generate_key().private_key_to_pem_pkcs8().unwrap();
        let err = CmsSigner::from_pem(&cert_pem, &other_key).unwrap_err();
        assert!(matches!(err, AfipError::Signing(msg) if msg.contains("does not match")));
    }

    #[test]
    fn test_from_config() {
        let (cert_pem, key_pem) = pem_pair();
        let config =
            MasterConfig::new(30_111_111_118, crate::config::Mode::Sandbox, cert_pem, key_pem);
        assert!(CmsSigner::from_config(&config).is_ok());
    }
}
