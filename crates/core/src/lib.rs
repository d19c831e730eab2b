#![forbid(unsafe_code)]

pub mod cancel;
pub mod query;
pub mod record;

pub use cancel::{RequestGate, RequestToken};
pub use query::{
    DEFAULT_WINDOW_LIMIT, Filter, FilterField, MAX_WINDOW_LIMIT, ScanDirection, SortColumn,
    WindowCursor, WindowEcho, WindowRequest, WindowResponse,
};
pub use record::{AttributeChange, Record, RecordError};

/// Hierarchy helpers for comma-separated distinguished names.
///
/// The trailing run of `dc=` components is the domain root and counts as a
/// single ancestor, so `uid=a,cn=users,dc=example,dc=test` has the ancestors
/// `cn=users,dc=example,dc=test` and `dc=example,dc=test`.
pub mod hierarchy {
    fn is_domain_component(rdn: &str) -> bool {
        rdn.get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("dc="))
    }

    fn split_name(name: &str) -> (Vec<&str>, Vec<&str>) {
        let mut rdns = Vec::new();
        let mut domain = Vec::new();
        for part in name.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if is_domain_component(part) {
                domain.push(part);
            } else {
                rdns.push(part);
            }
        }
        (rdns, domain)
    }

    /// Names of every ancestor, nearest first.
    pub fn ancestors(name: &str) -> Vec<String> {
        let (rdns, domain) = split_name(name);
        let mut chain = rdns
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if !domain.is_empty() {
            chain.push(domain.join(","));
        }
        (1..chain.len()).map(|i| chain[i..].join(",")).collect()
    }

    pub fn depth_of(name: &str) -> u32 {
        let (rdns, domain) = split_name(name);
        let levels = rdns.len() + usize::from(!domain.is_empty());
        u32::try_from(levels.saturating_sub(1)).unwrap_or(u32::MAX)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn directory_name_collapses_domain_root() {
            let name = "uid=test1,cn=users,cn=accounts,dc=granulex,dc=test";
            assert_eq!(
                ancestors(name),
                vec![
                    "cn=users,cn=accounts,dc=granulex,dc=test".to_string(),
                    "cn=accounts,dc=granulex,dc=test".to_string(),
                    "dc=granulex,dc=test".to_string(),
                ]
            );
            assert_eq!(depth_of(name), 3);
        }

        #[test]
        fn flat_and_root_names_have_no_ancestors() {
            assert_eq!(depth_of("a"), 0);
            assert!(ancestors("a").is_empty());
            assert_eq!(depth_of("dc=granulex,dc=test"), 0);
            assert_eq!(depth_of(""), 0);
        }

        #[test]
        fn names_without_domain_count_remaining_components() {
            assert_eq!(ancestors("cn=a, cn=b"), vec!["cn=b".to_string()]);
            assert_eq!(depth_of("cn=a,cn=b,cn=c"), 2);
            assert_eq!(depth_of("uid=x,DC=corp"), 1);
        }
    }
}
