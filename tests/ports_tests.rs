use recon_rs::ports::{parse_port_spec, to_engine_spec};

#[test]
fn parse_mixed_spec_with_dedup() {
    let ports = parse_port_spec("22,80,443,8000-8002,8001").expect("parse ok");
    // dedup, preserve first-appearance order
    assert_eq!(ports, vec![22, 80, 443, 8000, 8001, 8002]);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_port_spec("0").is_err());
    assert!(parse_port_spec("65536").is_err());
    assert!(parse_port_spec("80-22").is_err());
    assert!(parse_port_spec("abc").is_err());
}

#[test]
fn engine_spec_matches_nmap_dash_p_syntax() {
    let ports = parse_port_spec("21,22,80").unwrap();
    assert_eq!(to_engine_spec(&ports), "21,22,80");
}
