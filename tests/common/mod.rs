use dte_core::certificate::Certificate;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};

/// Self-signed RSA certificate with the subject fields the authority
/// requires, valid for one year from now.
#[allow(dead_code)]
pub fn test_certificate() -> Certificate {
    let (x509, pkey) = self_signed("Test Taxpayer", "11222333-4");
    Certificate::from_pem_pair(
        &x509.to_pem().expect("cert pem"),
        &pkey.private_key_to_pem_pkcs8().expect("key pem"),
    )
    .expect("certificate")
}

/// Raw self-signed certificate and key, for playing the authority.
#[allow(dead_code)]
pub fn self_signed(common_name: &str, serial_number: &str) -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).expect("rsa");
    let pkey = PKey::from_rsa(rsa).expect("pkey");

    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .expect("cn");
    name.append_entry_by_nid(Nid::SERIALNUMBER, serial_number)
        .expect("serialNumber");
    name.append_entry_by_nid(Nid::PKCS9_EMAILADDRESS, "taxpayer@example.com")
        .expect("email");
    let name = name.build();

    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("version");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&pkey).expect("pubkey");
    let serial = BigNum::from_u32(1)
        .expect("serial bn")
        .to_asn1_integer()
        .expect("serial asn1");
    builder.set_serial_number(&serial).expect("serial");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
        .expect("set not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(365).expect("not after"))
        .expect("set not after");
    builder.sign(&pkey, MessageDigest::sha256()).expect("sign");
    (builder.build(), pkey)
}
