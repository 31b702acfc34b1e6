use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use openssl::bn::BigNumContext;
use openssl::ec::PointConversionForm;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::sha::sha256;
use openssl::sign::Signer;
use serde_json::json;

use crate::types::{AcmeError, AcmeResult};

/// Account identity key. Knows how to produce the JWS envelope every
/// authority request is wrapped in, plus the JWK thumbprint that binds
/// challenge tokens to this account.
#[derive(Debug)]
pub struct AccountKey {
    key: PKey<Private>,
    alg: SigAlg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigAlg {
    Rs256,
    Es256,
}

impl AccountKey {
    /// Parse a PEM-encoded private key. RSA keys sign RS256; EC keys must
    /// be P-256 and sign ES256.
    pub fn from_pem(pem: &[u8]) -> AcmeResult<Self> {
        let key = PKey::private_key_from_pem(pem)?;
        let alg = match key.id() {
            Id::RSA => SigAlg::Rs256,
            Id::EC => {
                let ec = key.ec_key()?;
                if ec.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
                    return Err(AcmeError::UnsupportedKey(
                        "only P-256 EC keys are supported".into(),
                    ));
                }
                SigAlg::Es256
            }
            other => {
                return Err(AcmeError::UnsupportedKey(format!(
                    "unsupported key type {other:?}"
                )));
            }
        };
        Ok(Self { key, alg })
    }

    /// Public key as a JWK. serde_json orders object members
    /// lexicographically, which is exactly the RFC 7638 canonical order.
    fn jwk(&self) -> AcmeResult<serde_json::Value> {
        match self.alg {
            SigAlg::Rs256 => {
                let rsa = self.key.rsa()?;
                Ok(json!({
                    "e": URL_SAFE_NO_PAD.encode(rsa.e().to_vec()),
                    "kty": "RSA",
                    "n": URL_SAFE_NO_PAD.encode(rsa.n().to_vec()),
                }))
            }
            SigAlg::Es256 => {
                let ec = self.key.ec_key()?;
                let mut ctx = BigNumContext::new()?;
                let encoded = ec.public_key().to_bytes(
                    ec.group(),
                    PointConversionForm::UNCOMPRESSED,
                    &mut ctx,
                )?;
                // 0x04 || X (32 bytes) || Y (32 bytes)
                Ok(json!({
                    "crv": "P-256",
                    "kty": "EC",
                    "x": URL_SAFE_NO_PAD.encode(&encoded[1..33]),
                    "y": URL_SAFE_NO_PAD.encode(&encoded[33..65]),
                }))
            }
        }
    }

    /// SHA-256 thumbprint of the public JWK, base64url without padding.
    pub fn thumbprint(&self) -> AcmeResult<String> {
        let canonical = serde_json::to_string(&self.jwk()?)?;
        Ok(URL_SAFE_NO_PAD.encode(sha256(canonical.as_bytes())))
    }

    /// `<token>.<thumbprint>`, the content served at the well-known path.
    pub fn key_authorization(&self, token: &str) -> AcmeResult<String> {
        Ok(format!("{}.{}", token, self.thumbprint()?))
    }

    /// Wrap `payload` in a flattened-JSON JWS with the JWK embedded in the
    /// protected header.
    pub fn sign(&self, nonce: &str, payload: &serde_json::Value) -> AcmeResult<serde_json::Value> {
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
        let protected = json!({
            "alg": self.alg_name(),
            "jwk": self.jwk()?,
            "nonce": nonce,
        });
        let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected)?);
        let signing_input = format!("{protected_b64}.{payload_b64}");
        let signature = self.raw_signature(signing_input.as_bytes())?;
        Ok(json!({
            "protected": protected_b64,
            "payload": payload_b64,
            "signature": URL_SAFE_NO_PAD.encode(signature),
        }))
    }

    fn alg_name(&self) -> &'static str {
        match self.alg {
            SigAlg::Rs256 => "RS256",
            SigAlg::Es256 => "ES256",
        }
    }

    fn raw_signature(&self, input: &[u8]) -> AcmeResult<Vec<u8>> {
        match self.alg {
            SigAlg::Rs256 => {
                let mut signer = Signer::new(MessageDigest::sha256(), &self.key)?;
                signer.update(input)?;
                Ok(signer.sign_to_vec()?)
            }
            SigAlg::Es256 => {
                // JWS wants the fixed-width r || s form, not the DER
                // structure openssl emits.
                let digest = sha256(input);
                let ec = self.key.ec_key()?;
                let sig = EcdsaSig::sign(&digest, &ec)?;
                let r = sig.r().to_vec();
                let s = sig.s().to_vec();
                let mut out = vec![0u8; 64];
                out[32 - r.len()..32].copy_from_slice(&r);
                out[64 - s.len()..].copy_from_slice(&s);
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::rsa::Rsa;

    fn rsa_key() -> AccountKey {
        let rsa = Rsa::generate(2048).unwrap();
        let pem = rsa.private_key_to_pem().unwrap();
        AccountKey::from_pem(&pem).unwrap()
    }

    fn ec_key() -> AccountKey {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let ec = EcKey::generate(&group).unwrap();
        let pem = ec.private_key_to_pem().unwrap();
        AccountKey::from_pem(&pem).unwrap()
    }

    #[test]
    fn test_thumbprint_is_stable_and_sized() {
        let key = rsa_key();
        let a = key.thumbprint().unwrap();
        let b = key.thumbprint().unwrap();
        assert_eq!(a, b);
        // 32 bytes of SHA-256, base64url without padding
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn test_key_authorization_format() {
        let key = ec_key();
        let auth = key.key_authorization("some-token").unwrap();
        let (token, thumbprint) = auth.split_once('.').unwrap();
        assert_eq!(token, "some-token");
        assert_eq!(thumbprint, key.thumbprint().unwrap());
    }

    #[test]
    fn test_rsa_jws_envelope() {
        let key = rsa_key();
        let jws = key.sign("a-nonce", &json!({"resource": "new-reg"})).unwrap();
        let protected = URL_SAFE_NO_PAD
            .decode(jws["protected"].as_str().unwrap())
            .unwrap();
        let protected: serde_json::Value = serde_json::from_slice(&protected).unwrap();
        assert_eq!(protected["alg"], "RS256");
        assert_eq!(protected["nonce"], "a-nonce");
        assert_eq!(protected["jwk"]["kty"], "RSA");
        assert!(jws["signature"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[test]
    fn test_es256_signature_is_raw_form() {
        let key = ec_key();
        let jws = key.sign("n", &json!({})).unwrap();
        let signature = URL_SAFE_NO_PAD
            .decode(jws["signature"].as_str().unwrap())
            .unwrap();
        assert_eq!(signature.len(), 64);
        let protected = URL_SAFE_NO_PAD
            .decode(jws["protected"].as_str().unwrap())
            .unwrap();
        let protected: serde_json::Value = serde_json::from_slice(&protected).unwrap();
        assert_eq!(protected["alg"], "ES256");
        assert_eq!(protected["jwk"]["crv"], "P-256");
    }

    #[test]
    fn test_rejects_unsupported_curve() {
        let group = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
        let ec = EcKey::generate(&group).unwrap();
        let pem = ec.private_key_to_pem().unwrap();
        assert!(matches!(
            AccountKey::from_pem(&pem),
            Err(AcmeError::UnsupportedKey(_))
        ));
    }
}
