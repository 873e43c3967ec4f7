//! Keyword Planner
//!
//! Deterministic Planner used when no external planner is wired. It maps
//! goal keywords to recipes over the registered tools and honours the two
//! constraint shapes the rule assessor emits: `dry_run=true for '<tool>'`
//! and `avoid '<tool>'`.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use pca_core::{
    FailurePolicy, GenerationError, OutcomeCounts, Plan, PlanRequest, Planner, State, Step,
    StepResult, ToolRisk,
};

lazy_static! {
    /// "1 year", "30 days", "2 weeks"
    static ref AGE_RE: Regex = Regex::new(r"(?i)(\d+)\s*(day|week|month|year)s?").unwrap();

    /// Absolute, home-relative, dot-relative or drive-letter paths
    static ref PATH_RE: Regex =
        Regex::new(r#"(?:^|\s)((?:~|/|\.{1,2}/|[A-Za-z]:\\)[^\s"']*)"#).unwrap();

    static ref DRY_RUN_RE: Regex =
        Regex::new(r"(?i)dry_run\s*=?\s*(?:true\s+)?(?:for\s+'([^']+)')?").unwrap();

    static ref AVOID_RE: Regex = Regex::new(r"(?i)avoid\s+'?([\w.]+)'?").unwrap();

    static ref STEP_REF_RE: Regex = Regex::new(r"\{\{\s*step(\d+)\.").unwrap();
}

const CLAUSE_PENALTY: f64 = 0.2;
/// Confidence drop when the same goal recently ended without completing
const RECALL_PENALTY: f64 = 0.15;

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn has_any(words: &BTreeSet<String>, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| words.contains(*c))
}

/// Age in days mentioned in the goal ("1 year", "30 days")
pub fn parse_age_days(goal: &str) -> Option<u64> {
    let caps = AGE_RE.captures(goal)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = match caps.get(2)?.as_str().to_lowercase().as_str() {
        "day" => 1,
        "week" => 7,
        "month" => 30,
        _ => 365,
    };
    Some(amount.saturating_mul(unit))
}

/// First path-looking token in the goal
pub fn parse_path(goal: &str) -> Option<String> {
    PATH_RE
        .captures(goal)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', ',', '?']).to_string())
        .filter(|p| !p.is_empty())
}

/// What a set of constraints asks the planner to change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    /// Tools that must run with `dry_run=true`
    pub dry_run: BTreeSet<String>,
    /// Every destructive tool must run with `dry_run=true`
    pub dry_run_all: bool,
    /// Tools that must not appear in the plan
    pub avoid: BTreeSet<String>,
}

impl ConstraintSet {
    pub fn parse(constraints: &[String]) -> Self {
        let mut set = Self::default();
        for constraint in constraints {
            if let Some(caps) = AVOID_RE.captures(constraint) {
                if let Some(tool) = caps.get(1) {
                    set.avoid.insert(tool.as_str().to_string());
                }
                continue;
            }
            if let Some(caps) = DRY_RUN_RE.captures(constraint) {
                match caps.get(1) {
                    Some(tool) => {
                        set.dry_run.insert(tool.as_str().to_string());
                    }
                    None => set.dry_run_all = true,
                }
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.dry_run.is_empty() && !self.dry_run_all && self.avoid.is_empty()
    }
}

struct Recipe {
    reasoning: String,
    confidence: f64,
    steps: Vec<Step>,
}

/// Planner that builds plans from keyword recipes
#[derive(Debug, Clone)]
pub struct KeywordPlanner {
    default_path: String,
}

impl Default for KeywordPlanner {
    fn default() -> Self {
        Self {
            default_path: "~".to_string(),
        }
    }
}

impl KeywordPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory used when the goal names none
    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = path.into();
        self
    }

    fn recipe_for(&self, clause: &str) -> Option<Recipe> {
        let w = words(clause);
        let path = parse_path(clause).unwrap_or_else(|| self.default_path.clone());

        if has_any(&w, &["delete", "remove", "erase", "clean"]) && has_any(&w, &["old", "older"]) {
            let days = parse_age_days(clause).unwrap_or(365);
            return Some(Recipe {
                reasoning: format!("Find files older than {} days under {}, then delete them", days, path),
                confidence: 0.72,
                steps: vec![
                    Step::new(1, "fs.find_old_files")
                        .with_arg("path", path)
                        .with_arg("days", days),
                    Step::new(2, "fs.delete_file")
                        .with_arg("paths", "{{step1.files}}")
                        .on_failure(FailurePolicy::Skip),
                ],
            });
        }
        if has_any(&w, &["old", "older", "stale"]) && has_any(&w, &["find", "files", "list"]) {
            let days = parse_age_days(clause).unwrap_or(365);
            return Some(Recipe {
                reasoning: format!("Find files older than {} days under {}", days, path),
                confidence: 0.9,
                steps: vec![Step::new(1, "fs.find_old_files")
                    .with_arg("path", path)
                    .with_arg("days", days)],
            });
        }
        if has_any(&w, &["list", "ls"]) || (has_any(&w, &["show"]) && has_any(&w, &["files", "folder", "directory"])) {
            return Some(Recipe {
                reasoning: format!("List the contents of {}", path),
                confidence: 0.9,
                steps: vec![Step::new(1, "fs.list_dir").with_arg("path", path)],
            });
        }
        if has_any(&w, &["ip", "address", "hostname", "network"]) {
            return Some(Recipe {
                reasoning: "Read the local network configuration".into(),
                confidence: 0.95,
                steps: vec![Step::new(1, "net.get_config")],
            });
        }
        if has_any(&w, &["internet", "online", "connection", "connectivity", "ping"]) {
            return Some(Recipe {
                reasoning: "Check internet connectivity".into(),
                confidence: 0.9,
                steps: vec![Step::new(1, "net.check_connection")],
            });
        }
        if has_any(&w, &["system", "os", "specs", "hardware", "info", "cpu"]) {
            return Some(Recipe {
                reasoning: "Collect system information".into(),
                confidence: 0.9,
                steps: vec![Step::new(1, "sys.get_info")],
            });
        }
        None
    }

    fn build(&self, request: &PlanRequest) -> Result<Plan, GenerationError> {
        let clauses: Vec<&str> = request
            .goal
            .split(" and ")
            .flat_map(|c| c.split(" then "))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        let mut reasoning = Vec::new();
        let mut steps: Vec<Step> = Vec::new();
        let mut confidence: f64 = 1.0;
        let mut unmatched = 0usize;

        for clause in &clauses {
            match self.recipe_for(clause) {
                Some(recipe) => {
                    let offset = steps.len() as u32;
                    for mut step in recipe.steps {
                        step.step_id += offset;
                        for value in step.arguments.values_mut() {
                            renumber_references(value, offset);
                        }
                        steps.push(step);
                    }
                    confidence = confidence.min(recipe.confidence);
                    reasoning.push(recipe.reasoning);
                }
                None => unmatched += 1,
            }
        }

        if steps.is_empty() {
            return Err(GenerationError::new(format!(
                "no tool matches the goal '{}'",
                request.goal
            )));
        }

        confidence -= CLAUSE_PENALTY * unmatched as f64;
        if let Some(memo) = request.memory.last_outcome_of(&request.goal) {
            if matches!(memo.state, State::Failed | State::Aborted) {
                confidence -= RECALL_PENALTY;
                reasoning.push(format!("Previous attempt at this goal ended {}", memo.state));
            }
        }
        let constraints = ConstraintSet::parse(&request.constraints);
        if !constraints.is_empty() {
            self.apply_constraints(&mut steps, &constraints, request);
            confidence += 0.16;
            reasoning.push(format!("Adjusted for: {}", request.constraints.join("; ")));
        }

        Ok(Plan::new(reasoning.join(". "), confidence.clamp(0.0, 1.0), steps))
    }

    fn apply_constraints(&self, steps: &mut Vec<Step>, constraints: &ConstraintSet, request: &PlanRequest) {
        let is_destructive = |tool: &str| {
            request
                .available_tools
                .iter()
                .find(|d| d.name == tool)
                .map(|d| d.risk_level == ToolRisk::High)
                .unwrap_or_else(|| tool.contains("delete") || tool.contains("kill"))
        };

        steps.retain(|s| !constraints.avoid.contains(&s.tool_name));
        for step in steps.iter_mut() {
            if constraints.dry_run.contains(&step.tool_name)
                || (constraints.dry_run_all && is_destructive(&step.tool_name))
            {
                step.arguments.insert("dry_run".into(), Value::Bool(true));
            }
        }
        for (index, step) in steps.iter_mut().enumerate() {
            step.step_id = index as u32 + 1;
        }
    }
}

/// Shift `{{stepN.` references by `offset` when recipes are concatenated
fn renumber_references(value: &mut Value, offset: u32) {
    if offset == 0 {
        return;
    }
    match value {
        Value::String(text) => {
            let replaced = STEP_REF_RE.replace_all(text, |caps: &regex::Captures| {
                let n: u32 = caps[1].parse().unwrap_or(0);
                format!("{{{{step{}.", n + offset)
            });
            *text = replaced.into_owned();
        }
        Value::Array(items) => items.iter_mut().for_each(|v| renumber_references(v, offset)),
        Value::Object(map) => map.values_mut().for_each(|v| renumber_references(v, offset)),
        _ => {}
    }
}

#[async_trait]
impl Planner for KeywordPlanner {
    async fn generate(&self, request: &PlanRequest) -> Result<Plan, GenerationError> {
        let plan = self.build(request)?;
        tracing::debug!(
            goal = %request.goal,
            steps = plan.steps.len(),
            confidence = plan.confidence,
            "keyword plan"
        );
        Ok(plan)
    }

    async fn summarize(
        &self,
        goal: &str,
        _plan: &Plan,
        results: &[StepResult],
    ) -> Result<String, GenerationError> {
        let counts = OutcomeCounts::from_results(results);
        let mut details: Vec<Value> = Vec::new();
        for result in results.iter().filter(|r| r.status.is_success()) {
            if let Some(output) = &result.output {
                details.push(json!({ "tool": result.tool, "result": output }));
            }
        }
        let mut summary = format!(
            "{}: {} of {} steps succeeded, {} skipped, {} failed.",
            goal, counts.succeeded, counts.total, counts.skipped, counts.failed
        );
        if let Some(first) = details.first() {
            summary.push_str(&format!(" {} returned {}.", first["tool"].as_str().unwrap_or(""), first["result"]));
        }
        Ok(summary)
    }
}
