use std::fmt;

use crate::core::models::Volume;

/// Length of the ids the platform assigns to anonymous volumes.
const ANONYMOUS_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unnamed,
    Blacklisted,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unnamed => "unnamed",
            Self::Blacklisted => "blacklisted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectSource {
    WhitelistConfig,
    BlacklistConfig,
    Path,
    VolumeConfig,
}

impl RejectSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhitelistConfig => "whitelist config",
            Self::BlacklistConfig => "blacklist config",
            Self::Path => "path",
            Self::VolumeConfig => "volume config",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub source: Option<RejectSource>,
}

impl Rejection {
    /// Source as logged; empty when the rejection has no configured source.
    pub fn source_str(&self) -> &'static str {
        self.source.map(|s| s.as_str()).unwrap_or("")
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Some(source) => write!(f, "{} ({})", self.reason.as_str(), source.as_str()),
            None => f.write_str(self.reason.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Include,
    Reject(Rejection),
}

impl FilterDecision {
    pub fn is_included(&self) -> bool {
        matches!(self, Self::Include)
    }

    fn reject(reason: RejectReason, source: Option<RejectSource>) -> Self {
        Self::Reject(Rejection { reason, source })
    }
}

/// Decides which volumes are eligible for backup.
///
/// Both lists are kept sorted so membership is a binary search. Blank entries
/// are dropped, so a whitelist of `[""]` behaves like no whitelist.
#[derive(Debug, Clone, Default)]
pub struct VolumeFilter {
    whitelist: Vec<String>,
    blacklist: Vec<String>,
}

impl VolumeFilter {
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Self {
        Self {
            whitelist: sorted(whitelist),
            blacklist: sorted(blacklist),
        }
    }

    pub fn check(&self, volume: &Volume) -> FilterDecision {
        let name = volume.name.as_str();
        let len = name.chars().count();

        if len == 0 || len == ANONYMOUS_NAME_LEN {
            return FilterDecision::reject(RejectReason::Unnamed, None);
        }

        if name.contains('/') {
            return FilterDecision::reject(RejectReason::Blacklisted, Some(RejectSource::Path));
        }

        if !self.whitelist.is_empty() {
            if contains(&self.whitelist, name) {
                return FilterDecision::Include;
            }
            return FilterDecision::reject(
                RejectReason::Blacklisted,
                Some(RejectSource::WhitelistConfig),
            );
        }

        if contains(&self.blacklist, name) {
            return FilterDecision::reject(
                RejectReason::Blacklisted,
                Some(RejectSource::BlacklistConfig),
            );
        }

        if volume.config.ignore {
            return FilterDecision::reject(
                RejectReason::Blacklisted,
                Some(RejectSource::VolumeConfig),
            );
        }

        FilterDecision::Include
    }
}

fn sorted(list: &[String]) -> Vec<String> {
    let mut list: Vec<String> = list
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    list.sort();
    list
}

fn contains(sorted: &[String], name: &str) -> bool {
    sorted.binary_search_by(|probe| probe.as_str().cmp(name)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::VolumeConfig;

    fn volume(name: &str) -> Volume {
        Volume {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn rejection(decision: FilterDecision) -> Rejection {
        match decision {
            FilterDecision::Reject(r) => r,
            FilterDecision::Include => panic!("expected rejection"),
        }
    }

    #[test]
    fn empty_and_64_char_names_are_unnamed() {
        let filter = VolumeFilter::default();
        for name in ["".to_string(), "a".repeat(64), "é".repeat(64)] {
            let r = rejection(filter.check(&volume(&name)));
            assert_eq!(r.reason, RejectReason::Unnamed);
            assert_eq!(r.source, None);
        }
        assert!(filter.check(&volume(&"a".repeat(63))).is_included());
        assert!(filter.check(&volume(&"a".repeat(65))).is_included());
    }

    #[test]
    fn names_with_slash_are_blacklisted_by_path() {
        let filter = VolumeFilter::new(&names(&["a/b"]), &[]);
        let r = rejection(filter.check(&volume("a/b")));
        assert_eq!(r.reason, RejectReason::Blacklisted);
        assert_eq!(r.source, Some(RejectSource::Path));
        assert_eq!(r.source_str(), "path");
    }

    #[test]
    fn whitelist_restricts_to_listed_names() {
        let filter = VolumeFilter::new(&names(&["b", "a"]), &names(&["a"]));
        assert!(filter.check(&volume("a")).is_included());
        assert!(filter.check(&volume("b")).is_included());

        let r = rejection(filter.check(&volume("c")));
        assert_eq!(r.reason, RejectReason::Blacklisted);
        assert_eq!(r.source, Some(RejectSource::WhitelistConfig));
    }

    #[test]
    fn whitelisted_volume_ignores_volume_config() {
        let filter = VolumeFilter::new(&names(&["a"]), &[]);
        let mut v = volume("a");
        v.config = VolumeConfig {
            ignore: true,
            ..Default::default()
        };
        assert!(filter.check(&v).is_included());
    }

    #[test]
    fn blacklist_applies_without_whitelist() {
        let filter = VolumeFilter::new(&names(&[""]), &names(&["x"]));
        let r = rejection(filter.check(&volume("x")));
        assert_eq!(r.source, Some(RejectSource::BlacklistConfig));
        assert_eq!(r.to_string(), "blacklisted (blacklist config)");
        assert!(filter.check(&volume("y")).is_included());
    }

    #[test]
    fn ignored_volume_is_rejected_by_volume_config() {
        let filter = VolumeFilter::default();
        let mut v = volume("data");
        v.config.ignore = true;
        let r = rejection(filter.check(&v));
        assert_eq!(r.source, Some(RejectSource::VolumeConfig));
    }
}
