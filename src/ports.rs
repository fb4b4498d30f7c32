use anyhow::{bail, Context, Result};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// A non-empty, duplicate-free set of TCP ports (1..=65535), iterated in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRange {
    ports: BTreeSet<u16>,
}

impl PortRange {
    /// Inclusive span `start..=end`.
    pub fn span(start: u16, end: u16) -> Result<Self> {
        if start == 0 {
            bail!("port out of range: 0");
        }
        if start > end {
            bail!("invalid range {start}-{end} (start > end)");
        }
        Ok(Self {
            ports: (start..=end).collect(),
        })
    }

    /// Explicit set of ports. Duplicates collapse.
    pub fn from_ports(ports: impl IntoIterator<Item = u16>) -> Result<Self> {
        let ports: BTreeSet<u16> = ports.into_iter().collect();
        if ports.is_empty() {
            bail!("port list is empty");
        }
        if ports.contains(&0) {
            bail!("port out of range: 0");
        }
        Ok(Self { ports })
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Always false for a constructed range; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    pub fn first(&self) -> u16 {
        self.ports.first().copied().unwrap_or_default()
    }

    pub fn last(&self) -> u16 {
        self.ports.last().copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }
}

impl Default for PortRange {
    /// The well-known ports, 1-1024.
    fn default() -> Self {
        Self {
            ports: (1..=1024).collect(),
        }
    }
}

impl fmt::Display for PortRange {
    /// Consecutive ports collapse into `a-b` runs, e.g. `20-25,80,443`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.iter().peekable();
        let mut first = true;
        while let Some(start) = iter.next() {
            let mut end = start;
            while let Some(&next) = iter.peek() {
                if u32::from(next) != u32::from(end) + 1 {
                    break;
                }
                end = next;
                iter.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for PortRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse a command-line port expression.
///
/// Accepted forms:
/// - inclusive range: `20-25`
/// - comma-separated list: `80,443,22`; the scanned span runs from the
///   smallest to the largest listed port
/// - single port: `8080`
pub fn parse_port_expr(expr: &str) -> Result<PortRange> {
    let expr = expr.trim();
    if expr.is_empty() {
        bail!("empty port expression");
    }

    if let Some((a, b)) = expr.split_once('-') {
        let start = parse_port_str(a.trim())
            .with_context(|| format!("invalid start in range: {a}"))?;
        let end =
            parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
        return PortRange::span(start, end);
    }

    if expr.contains(',') {
        let mut listed = Vec::new();
        for item in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            listed.push(
                parse_port_str(item).with_context(|| format!("invalid port in list: {item}"))?,
            );
        }
        let (Some(&min), Some(&max)) = (listed.iter().min(), listed.iter().max()) else {
            bail!("port list is empty: {expr}");
        };
        return PortRange::span(min, max);
    }

    let p = parse_port_str(expr).with_context(|| format!("invalid port value: {expr}"))?;
    PortRange::span(p, p)
}

/// Parse ports file content into the set of TCP ports (1..=65535) it lists.
///
/// Supported formats per line:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
pub fn parse_ports_str(s: &str) -> Result<BTreeSet<u16>> {
    let mut ports = BTreeSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }

        match line.split_once('-') {
            Some((a, b)) => {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                ports.extend(start..=end);
            }
            None => {
                ports.insert(
                    parse_port_str(line)
                        .with_context(|| format!("line {line_no}: invalid port value: {line}"))?,
                );
            }
        }
    }

    Ok(ports)
}

/// Load a ports file into a [`PortRange`]. Errors if the file is unreadable, malformed or empty.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<PortRange> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read ports file: {}", path.display()))?;
    let ports = parse_ports_str(&content)?;
    PortRange::from_ports(ports)
        .with_context(|| format!("ports file lists no ports: {}", path.display()))
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
    fn expr_range() {
        let r = parse_port_expr("20-25").unwrap();
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![20, 21, 22, 23, 24, 25]);
    }

    #[test]
    fn expr_list_spans_min_to_max() {
        let r = parse_port_expr("443, 80,22").unwrap();
        assert_eq!(r.first(), 22);
        assert_eq!(r.last(), 443);
        assert_eq!(r.len(), 443 - 22 + 1);
    }

    #[test]
    fn expr_single() {
        let r = parse_port_expr(" 8080 ").unwrap();
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![8080]);
    }

    #[test]
    fn expr_rejects_garbage() {
        assert!(parse_port_expr("").is_err());
        assert!(parse_port_expr("0").is_err());
        assert!(parse_port_expr("65536").is_err());
        assert!(parse_port_expr("30-20").is_err());
        assert!(parse_port_expr("http").is_err());
        assert!(parse_port_expr("1-").is_err());
        assert!(parse_port_expr(",,").is_err());
    }

    #[test]
    fn parse_ranges_and_dedup() {
        let input = "8000-8002\n80\n8001\n";
        let ports = parse_ports_str(input).unwrap();
        assert_eq!(ports, BTreeSet::from([80, 8000, 8001, 8002]));
    }

    #[test]
    fn parse_with_comments_and_whitespace() {
        let input = r#"
            # common web ports
            80  # http
            443 # https
            8000-8002   # dev servers

            # blank lines and spaces should be fine
        "#;
        let ports = parse_ports_str(input).unwrap();
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![80, 443, 8000, 8001, 8002]);
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_ports_str("70000\n").is_err());
    }

    #[test]
    fn from_ports_sorts_and_dedups() {
        let r = PortRange::from_ports([443, 22, 80, 22]).unwrap();
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![22, 80, 443]);
        assert!(PortRange::from_ports(Vec::new()).is_err());
        assert!(PortRange::from_ports([0, 1]).is_err());
    }

    #[test]
    fn display_collapses_runs() {
        let r = PortRange::from_ports([20, 21, 22, 23, 24, 25, 80, 443, 444]).unwrap();
        assert_eq!(r.to_string(), "20-25,80,443-444");
        assert_eq!(PortRange::default().to_string(), "1-1024");
        assert_eq!(PortRange::span(65535, 65535).unwrap().to_string(), "65535");
    }
}
