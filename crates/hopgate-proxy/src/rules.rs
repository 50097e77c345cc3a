use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use hopgate_core::cidr::{self, CidrRule};
use hopgate_core::geoip::GeoIpDb;
use hopgate_core::glob::{looks_like_glob, Glob};
use hopgate_core::{GroupConfig, RouteConfig, RulesConfig};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RuleRoute {
    pub selector: String,
    pub forward: String,
}

struct PatternRoute {
    glob: Glob,
    route: RuleRoute,
}

struct RuleGroup {
    hostnames: std::collections::HashSet<String>,
    patterns: Vec<PatternRoute>,
    route: RuleRoute,
}

/// An indexed matcher compiled from a declarative rule list: exact
/// hostnames, glob patterns, named groups, a GeoIP country table, CIDR
/// blocks, and an optional catch-all. Mirrors `pkg/core/rules.go`, with
/// the match order redesigned per spec.md §4.3 (hostnames → patterns →
/// groups → geoip/cidr → final — the source instead checks groups before
/// patterns).
pub struct Rules {
    hostnames: HashMap<String, RuleRoute>,
    patterns: Vec<PatternRoute>,
    groups: HashMap<String, RuleGroup>,
    geoips: HashMap<String, RuleRoute>,
    cidrs: Vec<CidrRule<RuleRoute>>,
    geoip_db: Option<GeoIpDb>,
    resolver: Option<TokioAsyncResolver>,
    final_route: Option<RuleRoute>,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub selector: String,
    pub forward: String,
    pub matched_label: String,
}

enum Classified<'a> {
    Final,
    Geoip(&'a str),
    Cidr(&'a str),
    Group(&'a str),
    Pattern,
    Hostname,
    Unknown,
}

fn classify(rule: &str) -> Classified<'_> {
    if rule == "**" {
        Classified::Final
    } else if let Some(code) = rule.strip_prefix("geoip:") {
        Classified::Geoip(code)
    } else if let Some(net) = rule.strip_prefix("ip-cidr:") {
        Classified::Cidr(net)
    } else if let Some(name) = rule.strip_prefix("group:") {
        Classified::Group(name)
    } else if looks_like_glob(rule) {
        Classified::Pattern
    } else if rule.parse::<IpAddr>().is_ok() || is_domain_like(rule) {
        Classified::Hostname
    } else {
        Classified::Unknown
    }
}

fn is_domain_like(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == ':')
}

impl Rules {
    /// Builds an immutable `Rules` from parsed config, iterating
    /// `conf.routes` once (first-write-wins for hostnames/groups/geoips/
    /// final) and then `conf.groups` to populate previously-declared
    /// group records.
    pub fn build(conf: &RulesConfig, geoip_db: Option<GeoIpDb>) -> Self {
        let mut hostnames = HashMap::new();
        let mut patterns = Vec::new();
        let mut groups: HashMap<String, RuleGroup> = HashMap::new();
        let mut geoips = HashMap::new();
        let mut cidrs = Vec::new();
        let mut final_route = None;

        for route in &conf.routes {
            let forward = sanitize_forward(&route.forward);
            let rule_route = RuleRoute {
                selector: route.selector.clone(),
                forward,
            };
            match classify(&route.rule) {
                Classified::Final => {
                    final_route.get_or_insert(rule_route);
                }
                Classified::Geoip(code) => {
                    geoips.entry(code.to_lowercase()).or_insert(rule_route);
                }
                Classified::Cidr(net) => {
                    if let Some(net) = cidr::parse_cidr(net) {
                        cidrs.push(CidrRule {
                            net,
                            value: rule_route,
                        });
                    } else {
                        debug!(rule = %route.rule, "dropping route with invalid cidr");
                    }
                }
                Classified::Group(name) => {
                    groups.entry(name.to_string()).or_insert_with(|| RuleGroup {
                        hostnames: Default::default(),
                        patterns: Vec::new(),
                        route: rule_route,
                    });
                }
                Classified::Pattern => match Glob::compile(&route.rule) {
                    Ok(glob) => patterns.push(PatternRoute {
                        glob,
                        route: rule_route,
                    }),
                    Err(e) => debug!(rule = %route.rule, error = %e, "dropping invalid glob route"),
                },
                Classified::Hostname => {
                    hostnames.entry(route.rule.clone()).or_insert(rule_route);
                }
                Classified::Unknown => {
                    debug!(rule = %route.rule, "dropping unrecognized route");
                }
            }
        }

        for GroupConfig { name, hostnames: members } in &conf.groups {
            let Some(group) = groups.get_mut(name) else {
                continue;
            };
            for member in members {
                if looks_like_glob(member) {
                    if let Ok(glob) = Glob::compile(member) {
                        group.patterns.push(PatternRoute {
                            glob,
                            route: group.route.clone(),
                        });
                    }
                } else {
                    group.hostnames.insert(member.clone());
                }
            }
        }

        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

        Self {
            hostnames,
            patterns,
            groups,
            geoips,
            cidrs,
            geoip_db,
            resolver: Some(resolver),
            final_route,
        }
    }

    /// Evaluates the match order from spec.md §4.3: exact hostnames,
    /// then patterns, then groups, then (resolving to an IP) geoip and
    /// cidr, then the catch-all.
    pub async fn matches(&self, hostname: &str) -> Option<MatchResult> {
        if let Some(route) = self.hostnames.get(hostname) {
            return Some(self.result(route, hostname.to_string()));
        }

        for pattern in &self.patterns {
            if pattern.glob.matches(hostname) {
                return Some(self.result(&pattern.route, hostname.to_string()));
            }
        }

        for (name, group) in &self.groups {
            let literal_hit = group.hostnames.contains(hostname);
            let pattern_hit = group.patterns.iter().any(|p| p.glob.matches(hostname));
            if literal_hit || pattern_hit {
                return Some(MatchResult {
                    selector: group.route.selector.clone(),
                    forward: group.route.forward.clone(),
                    matched_label: format!("group:{name}"),
                });
            }
        }

        if let Some(ip) = self.resolve_ip(hostname).await {
            if let Some(db) = &self.geoip_db {
                if let Some(code) = db.lookup_country(ip) {
                    if let Some(route) = self.geoips.get(&code) {
                        return Some(self.result(route, format!("geoip:{code}")));
                    }
                }
            }
            if let Some(route) = cidr::find_first(&self.cidrs, ip) {
                return Some(self.result(route, "ip-cidr".to_string()));
            }
        }

        self.final_route
            .as_ref()
            .map(|route| self.result(route, "**".to_string()))
    }

    fn result(&self, route: &RuleRoute, matched_label: String) -> MatchResult {
        MatchResult {
            selector: route.selector.clone(),
            forward: route.forward.clone(),
            matched_label,
        }
    }

    /// If `hostname` is a literal IP, use it directly; otherwise resolve
    /// it via DNS and take the first address. Resolution failure means
    /// the geoip/cidr steps are skipped entirely.
    async fn resolve_ip(&self, hostname: &str) -> Option<IpAddr> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Some(ip);
        }
        let resolver = self.resolver.as_ref()?;
        let response = resolver.lookup_ip(hostname).await.ok()?;
        response.iter().next()
    }
}

/// `forward` is accepted only if it is a valid `host:port`, a bare
/// domain, or a bare IP; otherwise dropped (empty string = no override).
fn sanitize_forward(forward: &str) -> String {
    if forward.is_empty() {
        return String::new();
    }
    if hopgate_core::addr::is_valid_addr(forward)
        || hopgate_core::addr::parse_ip(forward).is_some()
        || is_domain_like(forward)
    {
        forward.to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopgate_core::RouteConfig as RC;

    fn rules_config(routes: Vec<(&str, &str, &str)>, groups: Vec<(&str, Vec<&str>)>) -> RulesConfig {
        RulesConfig {
            routes: routes
                .into_iter()
                .map(|(rule, forward, selector)| RC {
                    rule: rule.to_string(),
                    forward: forward.to_string(),
                    selector: selector.to_string(),
                })
                .collect(),
            groups: groups
                .into_iter()
                .map(|(name, hostnames)| GroupConfig {
                    name: name.to_string(),
                    hostnames: hostnames.into_iter().map(str::to_string).collect(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn priority_order_exact_beats_pattern_beats_group_beats_final() {
        let conf = rules_config(
            vec![
                ("example.com", "", "A"),
                ("*.example.com", "", "B"),
                ("group:g", "", "C"),
                ("**", "", "E"),
            ],
            vec![("g", vec!["example.com"])],
        );
        let rules = Rules::build(&conf, None);

        assert_eq!(rules.matches("example.com").await.unwrap().selector, "A");
        assert_eq!(rules.matches("www.example.com").await.unwrap().selector, "B");
        assert_eq!(rules.matches("other.test").await.unwrap().selector, "E");
    }

    #[tokio::test]
    async fn group_matches_before_final_when_no_exact_or_pattern() {
        let conf = rules_config(
            vec![("group:g", "", "C"), ("**", "", "E")],
            vec![("g", vec!["member.test"])],
        );
        let rules = Rules::build(&conf, None);
        let m = rules.matches("member.test").await.unwrap();
        assert_eq!(m.selector, "C");
        assert_eq!(m.matched_label, "group:g");
    }

    #[tokio::test]
    async fn ip_cidr_matches_literal_ip_destinations() {
        let conf = rules_config(vec![("ip-cidr:10.0.0.0/8", "", "DIRECT")], vec![]);
        let rules = Rules::build(&conf, None);
        assert_eq!(rules.matches("10.1.2.3").await.unwrap().selector, "DIRECT");
    }

    #[tokio::test]
    async fn no_match_returns_none_without_final() {
        let conf = rules_config(vec![("example.com", "", "DIRECT")], vec![]);
        let rules = Rules::build(&conf, None);
        assert!(rules.matches("nomatch.test").await.is_none());
    }

    #[test]
    fn classifies_rule_prefixes() {
        assert!(matches!(classify("**"), Classified::Final));
        assert!(matches!(classify("geoip:cn"), Classified::Geoip("cn")));
        assert!(matches!(classify("ip-cidr:10.0.0.0/8"), Classified::Cidr(_)));
        assert!(matches!(classify("group:g"), Classified::Group("g")));
        assert!(matches!(classify("*.example.com"), Classified::Pattern));
        assert!(matches!(classify("example.com"), Classified::Hostname));
    }

    #[test]
    fn sanitizes_forward_overrides() {
        assert_eq!(sanitize_forward(""), "");
        assert_eq!(sanitize_forward("10.0.0.1"), "10.0.0.1");
        assert_eq!(sanitize_forward("10.0.0.1:443"), "10.0.0.1:443");
        assert_eq!(sanitize_forward("example.com"), "example.com");
    }
}
