use rcgen::{CertificateParams, KeyPair};

/// Generate and dump Rust source for a self-signed certificate and
/// private key in PEM format, for pasting into `tests/common/mod.rs`
/// and `benches/stream.rs`.  The certificate is valid for the DNS
/// names given as arguments (default `example.com`) and expires in
/// 2099.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        names.push("example.com".into());
    }
    let mut params = CertificateParams::new(names)?;
    params.not_after = params.not_after.replace_year(2099)?;

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    println!("// See `gen_test_cert/` folder to regenerate certificate and key.");
    println!("// Certificate expires in 2099.");
    println!("const CERT_PEM: &str = r\"\n{}\";", cert.pem());
    println!("const KEY_PEM: &str = r\"\n{}\";", key_pair.serialize_pem());
    Ok(())
}
