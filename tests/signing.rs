mod common;

use dte_core::signature::{
    verify_xml, verify_xml_reference, verify_xml_with_key, SignatureError, XmlSigner,
};

const SAMPLE_DTE: &str = "<DTE version=\"1.0\">\
<Documento ID=\"F60T33\">\
<Encabezado><Emisor><RUTEmisor>76192083-9</RUTEmisor></Emisor>\
<Receptor><RUTRecep>66666666-6</RUTRecep></Receptor>\
<Totales><MntTotal>119000</MntTotal></Totales></Encabezado>\
<Detalle><NmbItem>Servicio de prueba</NmbItem><MontoItem>100000</MontoItem></Detalle>\
</Documento>\
</DTE>";

#[test]
fn sign_and_verify_whole_document() {
    let signer = XmlSigner::new(common::test_certificate());
    let signed = signer.sign_xml(SAMPLE_DTE, None).expect("sign");

    assert!(signed.contains("<Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\">"));
    assert!(signed.contains("<SignatureValue>"));
    assert!(signed.contains("<Modulus>"));
    verify_xml(&signed).expect("verify");
}

#[test]
fn sign_and_verify_referenced_node() {
    let signer = XmlSigner::new(common::test_certificate());
    let signed = signer.sign_xml(SAMPLE_DTE, Some("F60T33")).expect("sign");

    assert!(signed.contains("URI=\"#F60T33\""));
    verify_xml(&signed).expect("verify");
}

#[test]
fn missing_reference_is_reported() {
    let signer = XmlSigner::new(common::test_certificate());
    let err = signer.sign_xml(SAMPLE_DTE, Some("NOPE")).unwrap_err();
    assert!(matches!(err, SignatureError::ReferenceNotFound { ref id } if id == "NOPE"));
}

#[test]
fn tampering_breaks_the_digest() {
    let signer = XmlSigner::new(common::test_certificate());
    let signed = signer.sign_xml(SAMPLE_DTE, None).expect("sign");

    let tampered = signed.replace("119000", "119001");
    assert_ne!(signed, tampered);
    let err = verify_xml(&tampered).unwrap_err();
    assert!(matches!(err, SignatureError::DigestMismatch));
}

#[test]
fn tampered_signature_value_fails_verification() {
    let signer = XmlSigner::new(common::test_certificate());
    let signed = signer.sign_xml(SAMPLE_DTE, None).expect("sign");

    // swap the signature for one over different bytes
    let other = signer
        .sign_xml("<DTE version=\"1.0\"><Documento ID=\"X\"/></DTE>", None)
        .expect("sign other");
    let value_of = |xml: &str| -> String {
        let start = xml.find("<SignatureValue>").unwrap() + "<SignatureValue>".len();
        let end = xml.find("</SignatureValue>").unwrap();
        xml[start..end].to_string()
    };
    let tampered = signed.replace(&value_of(&signed), &value_of(&other));
    let err = verify_xml(&tampered).unwrap_err();
    assert!(matches!(err, SignatureError::InvalidSignature));
}

#[test]
fn unsigned_document_is_reported_missing() {
    let err = verify_xml(SAMPLE_DTE).unwrap_err();
    assert!(matches!(err, SignatureError::MissingSignature));
}

#[test]
fn re_signing_replaces_the_previous_signature() {
    let signer = XmlSigner::new(common::test_certificate());
    let once = signer.sign_xml(SAMPLE_DTE, None).expect("first");
    let twice = signer.sign_xml(&once, None).expect("second");

    assert_eq!(twice.matches("<SignatureValue>").count(), 1);
    verify_xml(&twice).expect("verify");
}

#[test]
fn verifies_against_supplied_public_key() {
    let cert = common::test_certificate();
    let modulus = cert.modulus_b64().expect("modulus");
    let exponent = cert.exponent_b64().expect("exponent");
    let pem =
        dte_core::certificate::public_key_from_modulus_exponent(&modulus, &exponent)
            .expect("public pem");

    let signer = XmlSigner::new(cert);
    let signed = signer.sign_xml(SAMPLE_DTE, None).expect("sign");
    verify_xml_with_key(&signed, pem.as_bytes()).expect("verify with key");

    let (other, _) = common::self_signed("Other", "1-9");
    let other_pem = other
        .public_key()
        .expect("pkey")
        .public_key_to_pem()
        .expect("pem");
    let err = verify_xml_with_key(&signed, &other_pem).unwrap_err();
    assert!(matches!(err, SignatureError::InvalidSignature));
}

#[test]
fn signs_nodes_inheriting_the_document_namespace() {
    // Documento does not redeclare xmlns; the canonical form of the
    // referenced subtree must still carry it
    let xml = "<DTE xmlns=\"http://www.sii.cl/SiiDte\" version=\"1.0\">\
               <Documento ID=\"D77\"><MntTotal>5000</MntTotal></Documento></DTE>";
    let signer = XmlSigner::new(common::test_certificate());
    let signed = signer.sign_xml(xml, Some("D77")).expect("sign");
    verify_xml(&signed).expect("verify");

    let tampered = signed.replace("5000", "5001");
    let err = verify_xml(&tampered).unwrap_err();
    assert!(matches!(err, SignatureError::DigestMismatch));
}

#[test]
fn envelope_with_multiple_signed_children_verifies_each_reference() {
    const ENVELOPE: &str = "<EnvioDTE version=\"1.0\">\
        <Documento ID=\"A\"><MntTotal>100</MntTotal></Documento>\
        <Documento ID=\"B\"><MntTotal>200</MntTotal></Documento></EnvioDTE>";
    let signer = XmlSigner::new(common::test_certificate());
    let signed = signer.sign_xml(ENVELOPE, Some("A")).expect("sign A");
    let signed = signer.sign_xml(&signed, Some("B")).expect("sign B");

    verify_xml_reference(&signed, "A").expect("verify A");
    verify_xml_reference(&signed, "B").expect("verify B");

    // tampering inside A is caught by A's own signature, even though
    // B's signature comes later in document order
    let tampered = signed.replace("<MntTotal>100</MntTotal>", "<MntTotal>101</MntTotal>");
    let err = verify_xml_reference(&tampered, "A").unwrap_err();
    assert!(matches!(err, SignatureError::DigestMismatch));
    verify_xml_reference(&tampered, "B").expect("B untouched");

    let err = verify_xml_reference(&signed, "Z").unwrap_err();
    assert!(matches!(err, SignatureError::ReferenceNotFound { .. }));
}

#[test]
fn whole_document_verification_prefers_the_root_signature() {
    const ENVELOPE: &str = "<EnvioDTE version=\"1.0\">\
        <Documento ID=\"A\"><MntTotal>100</MntTotal></Documento></EnvioDTE>";
    let signer = XmlSigner::new(common::test_certificate());
    let signed = signer.sign_xml(ENVELOPE, Some("A")).expect("sign child");
    let signed = signer.sign_xml(&signed, None).expect("sign envelope");

    assert_eq!(signed.matches("<SignatureValue>").count(), 2);
    verify_xml(&signed).expect("verify root signature");
    verify_xml_reference(&signed, "A").expect("child signature still intact");
}

#[test]
fn accented_content_survives_the_legacy_encoding() {
    let xml = "<DTE version=\"1.0\"><Documento ID=\"D1\">\
               <RznSoc>Señores Muñoz y Cía.</RznSoc></Documento></DTE>";
    let signer = XmlSigner::new(common::test_certificate());
    let signed = signer.sign_xml(xml, Some("D1")).expect("sign");
    verify_xml(&signed).expect("verify");
}
