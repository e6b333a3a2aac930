//! Synthetic token issuer for tests and offline development.
use crate::caf::{Caf, CafError, TEST_IDK};
use base64ct::{Base64, Encoding};
use chrono::{NaiveDate, Utc};
use openssl::rsa::Rsa;

const KEY_BITS: u32 = 2048;

/// Builds structurally valid but unverifiable tokens.
///
/// The output carries a freshly generated RSA keypair, the synthetic
/// key identifier and a placeholder authority signature, so the rest of
/// the system can be exercised without authority connectivity.
///
/// # Examples
/// ```rust
/// use dte_core::caf::CafFaker;
///
/// let caf = CafFaker::new("76192083-9", "ACME LTDA")
///     .document_type(33)
///     .folio_range(1, 100)
///     .build()?;
/// assert!(caf.is_synthetic());
/// assert!(caf.in_range(100));
/// # Ok::<(), dte_core::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct CafFaker {
    issuer_id: String,
    issuer_name: String,
    document_type: u32,
    folio_from: u64,
    folio_to: u64,
    issued_at: NaiveDate,
}

impl CafFaker {
    pub fn new(issuer_id: impl Into<String>, issuer_name: impl Into<String>) -> Self {
        Self {
            issuer_id: issuer_id.into(),
            issuer_name: issuer_name.into(),
            document_type: 33,
            folio_from: 1,
            folio_to: 100,
            issued_at: Utc::now().date_naive(),
        }
    }

    pub fn document_type(mut self, document_type: u32) -> Self {
        self.document_type = document_type;
        self
    }

    pub fn folio_range(mut self, from: u64, to: u64) -> Self {
        self.folio_from = from;
        self.folio_to = to;
        self
    }

    pub fn issued_at(mut self, issued_at: NaiveDate) -> Self {
        self.issued_at = issued_at;
        self
    }

    /// Generate the token. Inverted ranges are rejected here, at
    /// creation time.
    pub fn build(&self) -> Result<Caf, CafError> {
        if self.folio_from > self.folio_to {
            return Err(CafError::InvalidRange {
                from: self.folio_from,
                to: self.folio_to,
            });
        }

        let rsa = Rsa::generate(KEY_BITS)?;
        // PEM output is ASCII
        let private_pem = String::from_utf8_lossy(&rsa.private_key_to_pem()?).to_string();
        let public_pem = String::from_utf8_lossy(&rsa.public_key_to_pem()?).to_string();
        let modulus = Base64::encode_string(&rsa.n().to_vec());
        let exponent = Base64::encode_string(&rsa.e().to_vec());
        let placeholder = Base64::encode_string(b"synthetic token without authority signature");

        let xml = format!(
            "<AUTORIZACION>\
             <CAF version=\"1.0\">\
             <DA>\
             <RE>{re}</RE>\
             <RS>{rs}</RS>\
             <TD>{td}</TD>\
             <RNG><D>{from}</D><H>{to}</H></RNG>\
             <FA>{fa}</FA>\
             <RSAPK><M>{modulus}</M><E>{exponent}</E></RSAPK>\
             <IDK>{idk}</IDK>\
             </DA>\
             <FRMA algoritmo=\"SHA1withRSA\">{frma}</FRMA>\
             </CAF>\
             <RSASK>{rsask}</RSASK>\
             <RSAPUBK>{rsapubk}</RSAPUBK>\
             </AUTORIZACION>",
            re = escape_text(&self.issuer_id),
            rs = escape_text(&self.issuer_name),
            td = self.document_type,
            from = self.folio_from,
            to = self.folio_to,
            fa = self.issued_at.format("%Y-%m-%d"),
            idk = TEST_IDK,
            frma = placeholder,
            rsask = private_pem,
            rsapubk = public_pem,
        );

        Caf::from_xml(&xml)
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
