//! IPv4 CIDR parsing and sequential subnet allocation.

use std::fmt;
use std::net::Ipv4Addr;

/// A parsed IPv4 block. The address is always the network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub network: u32,
    pub prefix: u8,
}

impl Ipv4Cidr {
    /// Parse `a.b.c.d/p`. Host bits must be zero.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid CIDR '{}': missing prefix length", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("invalid CIDR '{}': {}", s, e))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| format!("invalid CIDR '{}': {}", s, e))?;
        if prefix > 32 {
            return Err(format!("invalid CIDR '{}': prefix {} > 32", s, prefix));
        }
        let network = u32::from(addr);
        if network & !mask(prefix) != 0 {
            return Err(format!("invalid CIDR '{}': host bits set", s));
        }
        Ok(Self { network, prefix })
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// One past the last address.
    pub fn end(&self) -> u64 {
        u64::from(self.network) + self.size()
    }

    /// Whether `other` lies entirely inside this block.
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix >= self.prefix
            && u64::from(other.network) >= u64::from(self.network)
            && other.end() <= self.end()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.network), self.prefix)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

/// Carve consecutive blocks of the given prefix lengths out of `parent`.
///
/// Each block is aligned to its own size. Fails when the parent runs out of
/// space or a requested prefix is shorter than the parent's.
pub fn allocate(parent: &Ipv4Cidr, prefixes: &[u8]) -> Result<Vec<Ipv4Cidr>, String> {
    let mut cursor = u64::from(parent.network);
    let mut blocks = Vec::with_capacity(prefixes.len());

    for &prefix in prefixes {
        if prefix < parent.prefix || prefix > 32 {
            return Err(format!(
                "cannot allocate /{} inside {}",
                prefix, parent
            ));
        }
        let size = 1u64 << (32 - u32::from(prefix));
        let aligned = cursor.div_ceil(size) * size;
        if aligned + size > parent.end() {
            return Err(format!(
                "{} has no room for another /{} ({} allocated)",
                parent,
                prefix,
                blocks.len()
            ));
        }
        let network = u32::try_from(aligned).map_err(|e| format!("address overflow: {}", e))?;
        blocks.push(Ipv4Cidr { network, prefix });
        cursor = aligned + size;
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_valid() {
        let c = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
        assert_eq!(c.prefix, 16);
        assert_eq!(c.to_string(), "10.0.0.0/16");
        assert_eq!(c.size(), 65536);
    }

    #[test]
    fn test_parse_any() {
        let c = Ipv4Cidr::parse("0.0.0.0/0").unwrap();
        assert_eq!(c.size(), 1u64 << 32);
    }

    #[test]
    fn test_parse_rejects_host_bits() {
        let err = Ipv4Cidr::parse("10.0.0.1/16").unwrap_err();
        assert!(err.contains("host bits"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Ipv4Cidr::parse("10.0.0.0").is_err());
        assert!(Ipv4Cidr::parse("10.0.0/16").is_err());
        assert!(Ipv4Cidr::parse("10.0.0.0/33").is_err());
        assert!(Ipv4Cidr::parse("10.0.0.0/x").is_err());
    }

    #[test]
    fn test_allocate_sequential() {
        let vpc = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
        let blocks = allocate(&vpc, &[24, 24, 24]).unwrap();
        let rendered: Vec<_> = blocks.iter().map(|b| b.to_string()).collect();
        assert_eq!(rendered, vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"]);
    }

    #[test]
    fn test_allocate_aligns_mixed_sizes() {
        let vpc = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
        let blocks = allocate(&vpc, &[24, 20]).unwrap();
        assert_eq!(blocks[0].to_string(), "10.0.0.0/24");
        assert_eq!(blocks[1].to_string(), "10.0.16.0/20");
    }

    #[test]
    fn test_allocate_out_of_space() {
        let vpc = Ipv4Cidr::parse("10.0.0.0/24").unwrap();
        let err = allocate(&vpc, &[25, 25, 25]).unwrap_err();
        assert!(err.contains("no room"));
    }

    #[test]
    fn test_allocate_prefix_shorter_than_parent() {
        let vpc = Ipv4Cidr::parse("10.0.0.0/24").unwrap();
        assert!(allocate(&vpc, &[16]).is_err());
    }

    proptest! {
        #[test]
        fn prop_allocations_are_disjoint_and_contained(
            prefixes in proptest::collection::vec(20u8..=28, 1..12)
        ) {
            let vpc = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
            let blocks = allocate(&vpc, &prefixes).unwrap();
            prop_assert_eq!(blocks.len(), prefixes.len());
            for (i, a) in blocks.iter().enumerate() {
                prop_assert!(vpc.contains(a));
                prop_assert_eq!(a.prefix, prefixes[i]);
                for b in &blocks[i + 1..] {
                    prop_assert!(a.end() <= u64::from(b.network) || b.end() <= u64::from(a.network));
                }
            }
        }
    }
}
