/// Load-balancing node selection for streaming-replication clusters
///
/// Selection runs on client connect and again whenever a previously
/// selected node has become invalid. Redirect preferences are consulted
/// first; a weighted random draw over the remaining candidates decides
/// the rest.
use rand::Rng;
use regex::Regex;
use tracing::debug;

use crate::config::{PoolConfig, RedirectRuleSpec};
use crate::core::ClusterView;
use crate::error::ConfigError;

/// Sentinel for "no redirect preference matched".
const NO_PREFERENCE: i32 = -2;

/// Sentinel a resolved "standby" token leaves for the balancer.
const ANY_STANDBY: i32 = -1;

/// One compiled redirect preference.
#[derive(Debug)]
pub struct RedirectRule {
    pattern: Regex,
    target: String,
    weight: f64,
}

impl RedirectRule {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// Ordered redirect preferences; first match wins.
#[derive(Debug, Default)]
pub struct RedirectRuleList {
    rules: Vec<RedirectRule>,
}

impl RedirectRuleList {
    /// Compile rule specs, anchoring each pattern to match whole names
    /// unless it anchors itself.
    pub fn compile(specs: &[RedirectRuleSpec]) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            if !(0.0..=1.0).contains(&spec.weight) {
                return Err(ConfigError::ValidationError(format!(
                    "redirect weight {} is outside [0.0, 1.0]",
                    spec.weight
                )));
            }
            rules.push(RedirectRule {
                pattern: anchored(&spec.pattern)?,
                target: spec.target.clone(),
                weight: spec.weight,
            });
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    fn first_match(&self, candidate: &str) -> Option<(usize, &RedirectRule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.pattern.is_match(candidate))
    }
}

fn anchored(pattern: &str) -> Result<Regex, ConfigError> {
    let head = if pattern.starts_with('^') { "" } else { "^" };
    let tail = if pattern.ends_with('$') { "" } else { "$" };
    Regex::new(&format!("{head}{pattern}{tail}"))
        .map_err(|e| ConfigError::ValidationError(format!("invalid redirect pattern: {e}")))
}

/// Resolve a redirect target token against the current cluster view.
///
/// "primary" names the primary node (the master when the cluster has no
/// primary), "standby" leaves the standby sentinel for the balancer to
/// fill in, and a numeric token names a physical node id. Anything else,
/// including out-of-range ids, falls back to the master node.
pub fn resolve_token(token: &str, view: &ClusterView) -> i32 {
    match token {
        "primary" => {
            if view.primary_node_id >= 0 {
                view.primary_node_id
            } else {
                view.master_node_id
            }
        }
        "standby" => ANY_STANDBY,
        _ => match token.parse::<i32>() {
            Ok(n) if n >= 0 && n < view.num_backends() => n,
            _ => view.master_node_id,
        },
    }
}

/// Chooses which backend node services a client session.
pub struct LoadBalancer {
    db_rules: Option<RedirectRuleList>,
    app_rules: Option<RedirectRuleList>,
}

impl LoadBalancer {
    pub fn new(db_rules: Option<RedirectRuleList>, app_rules: Option<RedirectRuleList>) -> Self {
        Self {
            db_rules,
            app_rules,
        }
    }

    /// Compile the redirect preference lists out of the pool
    /// configuration.
    pub fn from_config(config: &PoolConfig) -> Result<Self, ConfigError> {
        let db_rules = config
            .redirect_dbnames
            .as_deref()
            .map(RedirectRuleList::compile)
            .transpose()?;
        let app_rules = config
            .redirect_app_names
            .as_deref()
            .map(RedirectRuleList::compile)
            .transpose()?;
        Ok(Self::new(db_rules, app_rules))
    }

    /// Select a backend node id for a session on `database` with the
    /// optional client-supplied application name.
    pub fn select_node(
        &self,
        view: &ClusterView,
        database: &str,
        application_name: Option<&str>,
    ) -> i32 {
        self.select_node_with(view, database, application_name, &mut rand::thread_rng())
    }

    /// Selection with an injected random source.
    pub fn select_node_with<R: Rng>(
        &self,
        view: &ClusterView,
        database: &str,
        application_name: Option<&str>,
        rng: &mut R,
    ) -> i32 {
        // One draw, reused for the preference weight test
        let r: f64 = rng.gen();

        let mut db_weight: Option<f64> = None;
        let mut app_weight: Option<f64> = None;
        let mut suggested = NO_PREFERENCE;

        if view.streaming_replication_mode {
            if let Some(rules) = &self.db_rules {
                if let Some((index, rule)) = rules.first_match(database) {
                    debug!(
                        database,
                        index,
                        target = %rule.target,
                        weight = rule.weight,
                        "database redirect preference matched"
                    );
                    let resolved = resolve_token(&rule.target, view);
                    if resolved == ANY_STANDBY || (resolved >= 0 && view.valid(resolved)) {
                        suggested = resolved;
                    }
                    db_weight = Some(rule.weight);
                }
            }

            if let Some(rules) = &self.app_rules {
                // Only when the client supplied one; old applications
                // may not set an application name
                if let Some(app_name) = application_name.filter(|name| !name.is_empty()) {
                    if let Some((index, rule)) = rules.first_match(app_name) {
                        // An application-name match overrides any
                        // database-name match
                        db_weight = None;
                        debug!(
                            app_name,
                            index,
                            target = %rule.target,
                            weight = rule.weight,
                            "application redirect preference matched"
                        );
                        let resolved = resolve_token(&rule.target, view);
                        if resolved == ANY_STANDBY || (resolved >= 0 && view.valid(resolved)) {
                            suggested = resolved;
                        }
                        app_weight = Some(rule.weight);
                    }
                }
            }
        }

        // A preferred node that loses its weight test is excluded from
        // the fallback draw below
        let mut no_load_balance_node = NO_PREFERENCE;

        if suggested >= 0 {
            let accepted = db_weight.map_or(false, |w| r <= w)
                || app_weight.map_or(false, |w| r <= w);
            if accepted {
                debug!(selected = suggested, "node selected by redirect preference");
                return suggested;
            }
            no_load_balance_node = suggested;
        }

        if suggested == ANY_STANDBY {
            let rejected = db_weight.map_or(false, |w| r > w)
                || app_weight.map_or(false, |w| r > w);
            if rejected {
                debug!(
                    selected = view.primary_node_id,
                    "standby preference lost its weight test, sending to primary"
                );
                return view.primary_node_id;
            }
        }

        // Weighted random draw across the nominally-up nodes
        let mut selected = view.master_node_id;
        let mut total_weight = 0.0;

        for i in 0..view.num_backends() {
            if view.valid_raw(i) {
                if i == no_load_balance_node {
                    continue;
                }
                if suggested == ANY_STANDBY {
                    if i != view.primary_node_id {
                        total_weight += view.weight(i);
                    }
                } else {
                    total_weight += view.weight(i);
                }
            }
        }

        let r = rng.gen::<f64>() * total_weight;
        let mut cursor = 0.0;

        for i in 0..view.num_backends() {
            if (suggested == ANY_STANDBY && i == view.primary_node_id)
                || i == no_load_balance_node
            {
                continue;
            }
            if view.valid_raw(i) && view.weight(i) > 0.0 {
                if r >= cursor {
                    selected = i;
                } else {
                    break;
                }
                cursor += view.weight(i);
            }
        }

        debug!(selected, "load balance node selected");
        selected
    }
}
