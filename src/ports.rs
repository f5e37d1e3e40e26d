use anyhow::{bail, Context, Result};

/// Parse a port specification into a deduplicated list of ports (1..=65535).
///
/// Supported syntax, matching what the scan engine accepts for `-p`:
/// - single port: `80`
/// - inclusive range: `8000-8010`
/// - comma-separated mix: `22,80,8000-8010`
pub fn parse_port_spec(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            bail!("empty element in port spec: {s}");
        }

        // Range `start-end`
        if let Some((a, b)) = part.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("invalid start in range: {a}"))?;
            let end =
                parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
            if start > end {
                bail!("invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        // Single number
        let p = parse_port_str(part).with_context(|| format!("invalid port value: {part}"))?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    Ok(out)
}

/// Render a port list back into the engine's comma-separated `-p` syntax.
pub fn to_engine_spec(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_ports() {
        let ports = parse_port_spec("80,22, 443").unwrap();
        assert_eq!(ports, vec![80, 22, 443]);
    }

    #[test]
    fn parse_ranges_and_dedup() {
        let ports = parse_port_spec("8000-8002,80,8001").unwrap();
        assert_eq!(ports, vec![8000, 8001, 8002, 80]);
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_port_spec("70000").is_err());
        assert!(parse_port_spec("0").is_err());
        assert!(parse_port_spec("443-80").is_err());
        assert!(parse_port_spec("22,,80").is_err());
    }

    #[test]
    fn engine_spec_round_trip() {
        let ports = parse_port_spec("22,80,8000-8002").unwrap();
        assert_eq!(to_engine_spec(&ports), "22,80,8000,8001,8002");
        assert_eq!(parse_port_spec(&to_engine_spec(&ports)).unwrap(), ports);
    }
}
