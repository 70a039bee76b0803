use super::*;
use crate::config::{NetworkConfig, TlsConfig};
use crate::client::ClientTlsOptions;

fn insecure_proxy() -> Proxy {
    let tls = TlsConfig {
        insecure: true,
        ..TlsConfig::default()
    };
    Proxy::new(&tls, &NetworkConfig::default())
}

#[test]
fn leader_raft_addr_maps_to_service_endpoint() {
    let proxy = insecure_proxy();
    assert_eq!(
        proxy.service_addr("127.0.0.1:32001").unwrap(),
        "127.0.0.1:32000"
    );
}

#[test]
fn malformed_leader_addr_is_an_error() {
    let proxy = insecure_proxy();
    assert!(proxy.service_addr("").is_err());
    assert!(proxy.service_addr("nohost").is_err());
}

#[test]
fn dial_options_mirror_the_inbound_posture() {
    let insecure = TlsConfig {
        insecure: true,
        ..TlsConfig::default()
    };
    assert!(ClientTlsOptions::mirror(&insecure).is_none());

    let secured = TlsConfig {
        insecure: false,
        certificate_path: "./server.cer".into(),
        private_key_path: "./server.key".into(),
        certificate_authority_path: "./ca.pem".into(),
        server_name: "Iris".into(),
    };
    let options = ClientTlsOptions::mirror(&secured).unwrap();
    assert_eq!(options.server_name, "Iris");
    assert_eq!(options.certificate_authority_path, "./ca.pem");
    assert_eq!(options.certificate_path, "./server.cer");
    assert_eq!(options.private_key_path, "./server.key");
}
