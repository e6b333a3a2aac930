//! Folio Authorization Token (CAF) entity and validation.
//!
//! A CAF is an authority-issued signed XML granting a document type a
//! contiguous folio range, with an embedded RSA keypair used to stamp
//! individual documents. Loading is deliberately lenient — absent
//! fields surface as zero/empty because their requiredness depends on
//! the document type — while validation is strict and typed.
pub mod faker;

pub use faker::CafFaker;

use crate::certificate::{self, CertificateError};
use crate::config::Environment;
use crate::signature::DigestAlg;
use crate::xml::{self, XmlError};
use chrono::{Duration, NaiveDate};
use openssl::error::ErrorStack;
use openssl::rsa::Rsa;
use openssl::sign::Verifier;
use openssl::x509::X509;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sentinel key identifier marking a synthetic, faker-produced token.
///
/// Synthetic tokens are exempt from authority-signature verification;
/// every other check still applies.
pub const TEST_IDK: u32 = 666;

/// Document types whose tokens expire after [`EXPIRY_DAYS`].
const EXPIRING_DOCUMENT_TYPES: [u32; 5] = [33, 43, 46, 56, 61];

const EXPIRY_DAYS: i64 = 180;

const DA_SELECTOR: &str = "/AUTORIZACION/CAF/DA";

/// Errors emitted while loading or validating a token.
#[derive(Debug, Error)]
pub enum CafError {
    #[error("authority certificate for key id {idk} is not in the store")]
    AuthorityCertMissing { idk: u32 },

    #[error("authority certificate for key id {idk} is unreadable: {message}")]
    AuthorityCertInvalid { idk: u32, message: String },

    #[error("authority signature does not verify against key id {idk}")]
    InvalidAuthoritySignature { idk: u32 },

    #[error("embedded keypair halves do not form a matching pair")]
    CorruptKeypair,

    #[error("inverted folio range {from}..{to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("failed to read '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("OpenSSL error: {0}")]
    Crypto(#[from] ErrorStack),
}

/// A loaded folio authorization token, read-only after construction.
#[derive(Clone)]
pub struct Caf {
    xml: String,
    issuer_id: String,
    issuer_name: String,
    document_type: u32,
    folio_from: u64,
    folio_to: u64,
    issued_at: Option<NaiveDate>,
    idk: u32,
    private_key_pem: Option<String>,
    public_key_pem: Option<String>,
    signature_b64: Option<String>,
    signature_digest: DigestAlg,
}

// keeps the embedded private key and raw XML out of debug output
impl std::fmt::Debug for Caf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caf")
            .field("issuer_id", &self.issuer_id)
            .field("issuer_name", &self.issuer_name)
            .field("document_type", &self.document_type)
            .field("folio_from", &self.folio_from)
            .field("folio_to", &self.folio_to)
            .field("issued_at", &self.issued_at)
            .field("idk", &self.idk)
            .finish()
    }
}

impl Caf {
    /// Load a token from authority-issued XML.
    ///
    /// Absent nodes surface as zero/empty rather than failing; the only
    /// structural rejection is an inverted folio range, since tokens
    /// come from an external source.
    pub fn from_xml(xml_text: &str) -> Result<Self, CafError> {
        let doc = xml::parse(xml_text)?;
        let ctx = xml::context(&doc)?;

        let issuer_id =
            xml::xpath_text_optional(&ctx, "/AUTORIZACION/CAF/DA/RE")?.unwrap_or_default();
        let issuer_name =
            xml::xpath_text_optional(&ctx, "/AUTORIZACION/CAF/DA/RS")?.unwrap_or_default();
        let document_type = parse_number(&ctx, "/AUTORIZACION/CAF/DA/TD")?;
        let from_text = xml::xpath_text_optional(&ctx, "/AUTORIZACION/CAF/DA/RNG/D")?;
        let to_text = xml::xpath_text_optional(&ctx, "/AUTORIZACION/CAF/DA/RNG/H")?;
        let folio_from = from_text.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0);
        let folio_to = to_text.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0);
        if from_text.is_some() && to_text.is_some() && folio_from > folio_to {
            return Err(CafError::InvalidRange {
                from: folio_from,
                to: folio_to,
            });
        }

        let issued_at = xml::xpath_text_optional(&ctx, "/AUTORIZACION/CAF/DA/FA")?
            .and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok());
        let idk = parse_number(&ctx, "/AUTORIZACION/CAF/DA/IDK")?;

        let private_key_pem = xml::xpath_text_optional(&ctx, "/AUTORIZACION/RSASK")?;
        let public_key_pem = xml::xpath_text_optional(&ctx, "/AUTORIZACION/RSAPUBK")?;
        let signature_b64 = xml::xpath_text_optional(&ctx, "/AUTORIZACION/CAF/FRMA")?;
        let signature_digest =
            match xml::xpath_text_optional(&ctx, "/AUTORIZACION/CAF/FRMA/@algoritmo")?.as_deref() {
                Some("SHA256withRSA") => DigestAlg::Sha256,
                _ => DigestAlg::Sha1,
            };

        Ok(Self {
            xml: xml_text.to_string(),
            issuer_id,
            issuer_name,
            document_type,
            folio_from,
            folio_to,
            issued_at,
            idk,
            private_key_pem,
            public_key_pem,
            signature_b64,
            signature_digest,
        })
    }

    /// Load a token from a file on disk.
    pub fn from_file(path: &Path) -> Result<Self, CafError> {
        let xml_text = std::fs::read_to_string(path).map_err(|e| CafError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_xml(&xml_text)
    }

    /// Raw XML the token was loaded from.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    pub fn document_type(&self) -> u32 {
        self.document_type
    }

    pub fn folio_from(&self) -> u64 {
        self.folio_from
    }

    pub fn folio_to(&self) -> u64 {
        self.folio_to
    }

    pub fn issued_at(&self) -> Option<NaiveDate> {
        self.issued_at
    }

    /// Authority key identifier the token was signed with.
    pub fn idk(&self) -> u32 {
        self.idk
    }

    /// Embedded stamping private key, PEM.
    pub fn private_key_pem(&self) -> Option<&str> {
        self.private_key_pem.as_deref()
    }

    /// Embedded stamping public key, PEM.
    pub fn public_key_pem(&self) -> Option<&str> {
        self.public_key_pem.as_deref()
    }

    /// Authority signature over the data block, base64.
    pub fn signature_b64(&self) -> Option<&str> {
        self.signature_b64.as_deref()
    }

    pub fn in_range(&self, folio: u64) -> bool {
        self.folio_from <= folio && folio <= self.folio_to
    }

    /// Expiry date, for the document types whose tokens expire.
    pub fn expires_at(&self) -> Option<NaiveDate> {
        if !EXPIRING_DOCUMENT_TYPES.contains(&self.document_type) {
            return None;
        }
        self.issued_at.map(|d| d + Duration::days(EXPIRY_DAYS))
    }

    /// Whether the token is usable at `as_of`. Always true for
    /// never-expiring document types.
    pub fn is_currently_valid(&self, as_of: NaiveDate) -> bool {
        match self.expires_at() {
            Some(expiry) => as_of <= expiry,
            None => true,
        }
    }

    /// Whether the token carries the synthetic-test key identifier.
    pub fn is_synthetic(&self) -> bool {
        self.idk == TEST_IDK
    }

    /// Environment the signing key identifier belongs to, if known.
    pub fn environment(&self) -> Option<Environment> {
        Environment::from_idk(self.idk)
    }
}

fn parse_number<T: std::str::FromStr + Default>(
    ctx: &libxml::xpath::Context,
    expr: &str,
) -> Result<T, CafError> {
    Ok(xml::xpath_text_optional(ctx, expr)?
        .and_then(|v| v.parse().ok())
        .unwrap_or_default())
}

/// Resolves an authority key identifier to its public certificate.
///
/// Injected into [`CafValidator`] so the store can be a directory, an
/// embedded bundle or a remote fetch without touching the validation
/// logic.
pub trait AuthorityCertResolver {
    fn resolve(&self, idk: u32) -> Result<Option<X509>, CafError>;
}

/// Read-only directory of authority certificates named `<idk>.cer`,
/// in DER or PEM form.
#[derive(Debug, Clone)]
pub struct DirectoryCertStore {
    dir: PathBuf,
}

impl DirectoryCertStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AuthorityCertResolver for DirectoryCertStore {
    fn resolve(&self, idk: u32) -> Result<Option<X509>, CafError> {
        let path = self.dir.join(format!("{idk}.cer"));
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CafError::Unreadable {
                    path,
                    source: e,
                })
            }
        };
        X509::from_pem(&bytes)
            .or_else(|_| X509::from_der(&bytes))
            .map(Some)
            .map_err(|e| CafError::AuthorityCertInvalid {
                idk,
                message: e.to_string(),
            })
    }
}

/// Validates tokens against the authority's well-known public keys.
pub struct CafValidator<R> {
    resolver: R,
}

impl<R: AuthorityCertResolver> CafValidator<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Full token validation.
    ///
    /// The embedded keypair is always probed for self-consistency;
    /// the authority signature over the data block is verified unless
    /// the token carries the synthetic key identifier, which has no
    /// authority counterpart by definition.
    pub fn validate(&self, caf: &Caf) -> Result<(), CafError> {
        check_embedded_keypair(caf)?;
        if caf.is_synthetic() {
            return Ok(());
        }
        self.check_authority_signature(caf)
    }

    fn check_authority_signature(&self, caf: &Caf) -> Result<(), CafError> {
        let idk = caf.idk();
        let cert = self
            .resolver
            .resolve(idk)?
            .ok_or(CafError::AuthorityCertMissing { idk })?;

        let signature = caf
            .signature_b64()
            .and_then(|v| certificate::decode_b64_relaxed(v).ok())
            .ok_or(CafError::InvalidAuthoritySignature { idk })?;

        let doc = xml::parse(caf.xml())?;
        let payload = xml::canonicalize_latin1(&doc, Some(DA_SELECTOR))?;

        let pkey = cert.public_key()?;
        let mut verifier = Verifier::new(caf.signature_digest.message_digest(), &pkey)?;
        verifier.update(&payload)?;
        if verifier.verify(&signature)? {
            Ok(())
        } else {
            Err(CafError::InvalidAuthoritySignature { idk })
        }
    }
}

/// Probe the embedded keypair: seal a random value with the private
/// half, open it with the public half, compare. A missing half is as
/// corrupt as a mismatched one.
fn check_embedded_keypair(caf: &Caf) -> Result<(), CafError> {
    let private_pem = caf.private_key_pem().ok_or(CafError::CorruptKeypair)?;
    let public_pem = caf.public_key_pem().ok_or(CafError::CorruptKeypair)?;

    let private = Rsa::private_key_from_pem(private_pem.as_bytes())
        .map_err(|_| CafError::CorruptKeypair)?;
    // older tokens carry PKCS#1 public keys, newer ones SPKI
    let public = Rsa::public_key_from_pem(public_pem.as_bytes())
        .or_else(|_| Rsa::public_key_from_pem_pkcs1(public_pem.as_bytes()))
        .map_err(|_| CafError::CorruptKeypair)?;

    if certificate::probe_keypair(&private, &public) {
        Ok(())
    } else {
        Err(CafError::CorruptKeypair)
    }
}
