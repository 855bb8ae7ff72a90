use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Identifiers arrive either as JSON strings or as integer primary keys.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Signed(n) => n.to_string(),
            RawId::Unsigned(n) => n.to_string(),
        }
    }
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Clone, Debug, Serialize, ToSchema, JsonSchema, Eq, PartialEq, Hash, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
                RawId::deserialize(de).map(|raw| $name(raw.into_string()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}
id_newtype!(TeachingAssignmentId);
id_newtype!(SessionId);
id_newtype!(SlotId);
id_newtype!(ResourceId);
id_newtype!(CohortId);
id_newtype!(SubjectId);

#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Teacher,
    Room,
    #[default]
    Other,
}

/// Soft constraint catalog. Scores are signed; weights scale them.
#[derive(
    Clone,
    Copy,
    Debug,
    Serialize,
    Deserialize,
    ToSchema,
    JsonSchema,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
)]
#[serde(rename_all = "snake_case")]
pub enum SoftKind {
    Preference,
    LoadBalance,
    GapMinimization,
    SubjectSpread,
}

impl SoftKind {
    pub const ALL: [SoftKind; 4] = [
        SoftKind::Preference,
        SoftKind::LoadBalance,
        SoftKind::GapMinimization,
        SoftKind::SubjectSpread,
    ];

    pub fn default_weight(self) -> f64 {
        match self {
            SoftKind::Preference => 1.0,
            SoftKind::LoadBalance => 0.5,
            SoftKind::GapMinimization => 1.0,
            SoftKind::SubjectSpread => 0.5,
        }
    }
}

impl fmt::Display for SoftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SoftKind::Preference => "preference",
            SoftKind::LoadBalance => "load_balance",
            SoftKind::GapMinimization => "gap_minimization",
            SoftKind::SubjectSpread => "subject_spread",
        };
        f.write_str(s)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Serialize,
    Deserialize,
    ToSchema,
    JsonSchema,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
)]
#[serde(rename_all = "snake_case")]
pub enum HardKind {
    ResourceDoubleBooking,
    CohortDoubleBooking,
    Availability,
    CapabilityMatch,
    SlotCapacity,
    UnplacedSession,
}

impl fmt::Display for HardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HardKind::ResourceDoubleBooking => "resource_double_booking",
            HardKind::CohortDoubleBooking => "cohort_double_booking",
            HardKind::Availability => "availability",
            HardKind::CapabilityMatch => "capability_match",
            HardKind::SlotCapacity => "slot_capacity",
            HardKind::UnplacedSession => "unplaced_session",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SolveStatus {
    Feasible,
    Infeasible,
    Degraded,
}

/// Why a search phase gave up before finishing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Deadline,
    Cancelled,
    NodeLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Deadline => f.write_str("deadline"),
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::NodeLimit => f.write_str("node limit"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct RequirementSpec {
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn one() -> i64 {
    1
}

/// One teaching assignment; expands to `weekly_hours` sessions.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct SessionSpec {
    pub id: TeachingAssignmentId,
    #[serde(default)]
    pub teacher_id: Option<ResourceId>,
    #[serde(default)]
    pub subject_id: Option<SubjectId>,
    #[serde(default, alias = "cohort")]
    pub rombel_id: Option<CohortId>,
    #[serde(default = "one")]
    pub weekly_hours: i64,
    #[serde(default = "one")]
    pub duration: i64,
    #[serde(default)]
    pub requires: Vec<RequirementSpec>,
    #[serde(default)]
    pub preferred_slots: Vec<SlotId>,
    #[serde(default)]
    pub avoid_slots: Vec<SlotId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct TimeSlotSpec {
    pub id: SlotId,
    #[serde(alias = "day")]
    pub day_of_week: i64,
    #[serde(default)]
    pub period: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub capacity: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ResourceSpec {
    pub id: ResourceId,
    #[serde(default)]
    pub kind: ResourceKind,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub available: Vec<SlotId>,
    #[serde(default)]
    pub max_load: Option<i64>,
}

fn default_max_search_seconds() -> f64 {
    10.0
}
fn default_population_size() -> usize {
    30
}
fn default_generations() -> usize {
    200
}
fn default_stall_generations() -> usize {
    40
}
fn default_elite_count() -> usize {
    2
}
fn default_tournament_size() -> usize {
    3
}
fn default_crossover_rate() -> f64 {
    0.6
}

/// Solver knobs. Every field has a default so `{}` is a valid config.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ConstraintConfig {
    /// Enabled soft constraints; `None` enables the whole catalog.
    #[serde(default)]
    pub enabled_soft_constraints: Option<Vec<SoftKind>>,
    #[serde(default)]
    pub weights: std::collections::BTreeMap<SoftKind, f64>,
    #[serde(default = "default_max_search_seconds")]
    pub max_search_seconds: f64,
    #[serde(default)]
    pub max_search_nodes: Option<u64>,
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default = "default_stall_generations")]
    pub stall_generations: usize,
    #[serde(default = "default_elite_count")]
    pub elite_count: usize,
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub randomize_value_order: bool,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            enabled_soft_constraints: None,
            weights: Default::default(),
            max_search_seconds: default_max_search_seconds(),
            max_search_nodes: None,
            population_size: default_population_size(),
            generations: default_generations(),
            stall_generations: default_stall_generations(),
            elite_count: default_elite_count(),
            tournament_size: default_tournament_size(),
            crossover_rate: default_crossover_rate(),
            seed: 0,
            randomize_value_order: false,
        }
    }
}

impl ConstraintConfig {
    pub fn is_enabled(&self, kind: SoftKind) -> bool {
        match &self.enabled_soft_constraints {
            None => true,
            Some(kinds) => kinds.contains(&kind),
        }
    }

    /// Effective weight: 0 when disabled, configured value or the kind's default otherwise.
    pub fn weight(&self, kind: SoftKind) -> f64 {
        if !self.is_enabled(kind) {
            return 0.0;
        }
        self.weights
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_weight())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub period_id: serde_json::Value,
    #[serde(default)]
    pub teaching_assignments: Vec<SessionSpec>,
    #[serde(default)]
    pub time_slots: Vec<TimeSlotSpec>,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    #[serde(default)]
    pub constraints: Option<ConstraintConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq)]
pub struct AssignmentRecord {
    pub session_id: SessionId,
    pub slot_id: SlotId,
    #[serde(default)]
    pub resource_ids: Vec<ResourceId>,
    #[serde(default)]
    pub teaching_assignment_id: Option<TeachingAssignmentId>,
    #[serde(default)]
    pub rombel_id: Option<CohortId>,
    #[serde(default)]
    pub day_of_week: Option<i64>,
    #[serde(default)]
    pub period: Option<i64>,
    #[serde(default)]
    pub occupied_slot_ids: Vec<SlotId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq)]
pub struct HardViolation {
    pub constraint: HardKind,
    pub session_ids: Vec<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort: Option<CohortId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<SlotId>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq)]
pub struct SoftTerm {
    pub kind: SoftKind,
    pub weight: f64,
    pub raw: f64,
    pub contribution: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq)]
pub struct SearchStats {
    pub nodes_explored: u64,
    pub backtracks: u64,
    pub generations_run: u64,
    pub elapsed_seconds: f64,
    pub refiner_improved: bool,
    pub cache_hit: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Diagnostics {
    pub status: SolveStatus,
    pub violated_hard_constraints: Vec<HardViolation>,
    pub objective_score: f64,
    pub soft_breakdown: Vec<SoftTerm>,
    pub search_stats: SearchStats,
    pub early_termination: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub best_partial: Vec<AssignmentRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq)]
pub struct Summary {
    pub teaching_assignments: usize,
    pub sessions: usize,
    pub time_slots: usize,
    pub resources: usize,
    pub scheduled: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ScheduleResponse {
    pub generated_at: String,
    pub period_id: serde_json::Value,
    pub summary: Summary,
    pub schedule: Vec<AssignmentRecord>,
    pub diagnostics: Diagnostics,
}

/// A caller-supplied schedule to score against its request.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ExplainRequest {
    #[serde(flatten)]
    pub request: ScheduleRequest,
    pub schedule: Vec<AssignmentRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema, JsonSchema, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UnsatisfiableReason {
    UnknownCapability,
    NoCandidate,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema, JsonSchema, PartialEq)]
pub struct UnsatisfiableSession {
    pub session_id: SessionId,
    pub reason: UnsatisfiableReason,
    pub detail: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ValidationReport {
    pub ok: bool,
    pub sessions: usize,
    #[serde(default)]
    pub errors: Vec<FieldError>,
    #[serde(default)]
    pub unsatisfiable: Vec<UnsatisfiableSession>,
}
