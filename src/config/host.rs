use serde::{Deserialize, Serialize};

use crate::utils::expand_tilde;

pub const DEFAULT_PORT: u16 = 22;

/// One entry of the host tree.
///
/// An entry with `children` is a pure container and is never connected to;
/// a leaf must carry `host` and `user`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HostDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, rename = "keypath", skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    /// Intermediate hosts, in dial order, used to reach this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jump: Vec<HostDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HostDescriptor>,
}

impl HostDescriptor {
    pub fn leaf(name: &str, host: &str, user: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            user: user.to_string(),
            port: DEFAULT_PORT,
            ..Default::default()
        }
    }

    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check required fields and normalize defaults, recursing into
    /// `jump` and `children`. Returns every problem found, joined.
    pub fn validate(&mut self) -> std::result::Result<(), String> {
        let mut errs = Vec::new();

        if self.name.trim().is_empty() {
            errs.push("name is required".to_string());
        }

        if !self.is_group() {
            if self.host.trim().is_empty() {
                errs.push("host is required".to_string());
            }
            if self.user.trim().is_empty() {
                errs.push("user is required".to_string());
            }
        }

        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }

        self.key_path = self
            .key_path
            .take()
            .filter(|k| !k.trim().is_empty())
            .map(|k| expand_tilde(&k).to_string_lossy().into_owned());

        for (kind, list) in [("jump", &mut self.jump), ("child", &mut self.children)] {
            for (i, nested) in list.iter_mut().enumerate() {
                if let Err(e) = nested.validate() {
                    errs.push(format!("{kind} #{i} ({}): {e}", nested.name));
                }
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(errs.join(", "))
        }
    }

    /// Ordered chain to dial for this host: its jump hosts, then itself.
    pub fn chain(&self) -> Vec<HostDescriptor> {
        let mut chain = self.jump.clone();
        chain.push(self.clone());
        chain
    }

    /// Case-insensitive match on name, host or user.
    pub fn matches(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let q = query.to_lowercase();
        self.name.to_lowercase().contains(&q)
            || self.host.to_lowercase().contains(&q)
            || self.user.to_lowercase().contains(&q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_requires_host_and_user() {
        let mut h = HostDescriptor {
            name: "web".into(),
            ..Default::default()
        };
        let err = h.validate().unwrap_err();
        assert!(err.contains("host is required"));
        assert!(err.contains("user is required"));
    }

    #[test]
    fn group_only_requires_name() {
        let mut g = HostDescriptor {
            name: "prod".into(),
            children: vec![HostDescriptor::leaf("web", "10.0.0.1", "root")],
            ..Default::default()
        };
        assert!(g.validate().is_ok());
        assert!(g.is_group());
    }

    #[test]
    fn validate_defaults_port_recursively() {
        let mut h = HostDescriptor {
            name: "a".into(),
            host: "h1".into(),
            user: "u".into(),
            jump: vec![HostDescriptor {
                name: "j1".into(),
                host: "g1".into(),
                user: "u".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        h.validate().unwrap();
        assert_eq!(h.port, 22);
        assert_eq!(h.jump[0].port, 22);
    }

    #[test]
    fn nested_errors_name_the_entry() {
        let mut h = HostDescriptor {
            name: "a".into(),
            host: "h1".into(),
            user: "u".into(),
            jump: vec![HostDescriptor {
                name: "j1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = h.validate().unwrap_err();
        assert!(err.starts_with("jump #0 (j1): host is required"));
    }

    #[test]
    fn chain_puts_target_last() {
        let mut target = HostDescriptor::leaf("a", "h1", "u");
        target.jump = vec![HostDescriptor::leaf("j1", "g1", "u")];
        let names: Vec<_> = target.chain().into_iter().map(|h| h.host).collect();
        assert_eq!(names, vec!["g1", "h1"]);
    }

    #[test]
    fn matches_is_case_insensitive() {
        let h = HostDescriptor::leaf("Build-Box", "ci.example.com", "Jenkins");
        assert!(h.matches("build"));
        assert!(h.matches("EXAMPLE"));
        assert!(h.matches("jenk"));
        assert!(!h.matches("prod"));
    }
}
