use std::net::IpAddr;

use ipnet::IpNet;

/// One `ip-cidr:N/M` entry, scanned linearly in insertion order — first
/// containing net wins, matching the source's `RuleCIDR` list.
#[derive(Debug, Clone)]
pub struct CidrRule<T> {
    pub net: IpNet,
    pub value: T,
}

pub fn parse_cidr(s: &str) -> Option<IpNet> {
    s.parse().ok()
}

pub fn find_first<'a, T>(rules: &'a [CidrRule<T>], ip: IpAddr) -> Option<&'a T> {
    rules.iter().find(|r| r.net.contains(&ip)).map(|r| &r.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_cidr() {
        assert!(parse_cidr("10.0.0.0/8").is_some());
        assert!(parse_cidr("not-a-cidr").is_none());
    }

    #[test]
    fn first_containing_net_wins() {
        let rules = vec![
            CidrRule {
                net: "10.0.0.0/16".parse().unwrap(),
                value: "a",
            },
            CidrRule {
                net: "10.0.0.0/8".parse().unwrap(),
                value: "b",
            },
        ];
        let ip: IpAddr = "10.0.1.1".parse().unwrap();
        assert_eq!(find_first(&rules, ip), Some(&"a"));
    }
}
