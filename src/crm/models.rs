use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        [&self.street, &self.city, &self.state, &self.zip, &self.country]
            .iter()
            .all(|f| f.as_deref().is_none_or(|s| s.trim().is_empty()))
    }
}

/// Free-form profile links keyed by network ("linkedin", "twitter", ...).
pub type SocialLinks = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompanySize {
    #[serde(rename = "1-10")]
    Micro,
    #[serde(rename = "11-50")]
    Small,
    #[serde(rename = "51-200")]
    Medium,
    #[serde(rename = "201-500")]
    Large,
    #[serde(rename = "500+")]
    Enterprise,
}

impl CompanySize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Micro => "1-10",
            Self::Small => "11-50",
            Self::Medium => "51-200",
            Self::Large => "201-500",
            Self::Enterprise => "500+",
        }
    }
}

impl FromStr for CompanySize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1-10" => Ok(Self::Micro),
            "11-50" => Ok(Self::Small),
            "51-200" => Ok(Self::Medium),
            "201-500" => Ok(Self::Large),
            "500+" => Ok(Self::Enterprise),
            _ => Err(format!("Invalid company size: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Company {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub size: Option<CompanySize>,
    pub address: Option<Address>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid contact status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    pub id: i64,
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company_id: Option<i64>,
    pub position: Option<String>,
    pub address: Option<Address>,
    pub social_links: Option<SocialLinks>,
    pub notes: Option<String>,
    pub avatar_url: Option<String>,
    pub status: ContactStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// What a pipeline stage represents. Chosen when the stage is created and
/// never inferred from its display name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    Lead,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl StageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Qualified => "qualified",
            Self::Proposal => "proposal",
            Self::Negotiation => "negotiation",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }

    /// Accent colour for column headers and badges.
    pub fn accent(&self) -> &'static str {
        match self {
            Self::Lead => "#94a3b8",
            Self::Qualified => "#3b82f6",
            Self::Proposal => "#8b5cf6",
            Self::Negotiation => "#f59e0b",
            Self::Won => "#10b981",
            Self::Lost => "#f43f5e",
        }
    }
}

impl FromStr for StageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(Self::Lead),
            "qualified" => Ok(Self::Qualified),
            "proposal" => Ok(Self::Proposal),
            "negotiation" => Ok(Self::Negotiation),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            _ => Err(format!("Invalid stage role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DealStage {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub color: String,
    pub position: i32,
    pub role: StageRole,
    pub is_won: bool,
    pub is_lost: bool,
    pub created_at: String,
}

impl DealStage {
    pub fn is_terminal(&self) -> bool {
        self.is_won || self.is_lost
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deal {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub value: Option<f64>,
    pub stage_id: i64,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub probability: Option<i32>,
    pub expected_close_date: Option<String>,
    pub closed_at: Option<String>,
    pub close_reason: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloseOutcome {
    Won,
    Lost,
}

impl CloseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    pub fn role(&self) -> StageRole {
        match self {
            Self::Won => StageRole::Won,
            Self::Lost => StageRole::Lost,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Call,
    Email,
    Meeting,
    Task,
    Note,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Email => "email",
            Self::Meeting => "meeting",
            Self::Task => "task",
            Self::Note => "note",
        }
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(Self::Call),
            "email" => Ok(Self::Email),
            "meeting" => Ok(Self::Meeting),
            "task" => Ok(Self::Task),
            "note" => Ok(Self::Note),
            _ => Err(format!("Invalid activity type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub title: String,
    pub description: Option<String>,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub deal_id: Option<i64>,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub is_completed: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub deal_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Which record a note or activity listing is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelatedTo {
    Contact(i64),
    Company(i64),
    Deal(i64),
}

impl RelatedTo {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Contact(_) => "contact_id",
            Self::Company(_) => "company_id",
            Self::Deal(_) => "deal_id",
        }
    }

    pub(crate) fn id(&self) -> i64 {
        match self {
            Self::Contact(id) | Self::Company(id) | Self::Deal(id) => *id,
        }
    }
}

// ── Write payloads (already validated) ────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyInput {
    pub name: String,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub size: Option<CompanySize>,
    pub address: Option<Address>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactInput {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company_id: Option<i64>,
    pub position: Option<String>,
    pub address: Option<Address>,
    pub social_links: Option<SocialLinks>,
    pub notes: Option<String>,
    pub status: ContactStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealInput {
    pub title: String,
    pub value: Option<f64>,
    /// `None` places the deal in the first open stage.
    pub stage_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub probability: Option<i32>,
    pub expected_close_date: Option<String>,
    pub close_reason: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityInput {
    pub kind: ActivityType,
    pub title: String,
    pub description: Option<String>,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub deal_id: Option<i64>,
    pub due_date: Option<String>,
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteInput {
    pub content: String,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub deal_id: Option<i64>,
}

// ── API view types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DealWithRelations {
    #[serde(flatten)]
    pub deal: Deal,
    pub stage: DealStage,
    pub contact: Option<Contact>,
    pub company: Option<Company>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageColumnView {
    pub stage: DealStage,
    pub accent: String,
    pub deals: Vec<DealWithRelations>,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub columns: Vec<StageColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealDetail {
    #[serde(flatten)]
    pub deal: DealWithRelations,
    pub activities: Vec<Activity>,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactDetail {
    #[serde(flatten)]
    pub contact: Contact,
    pub company: Option<Company>,
    pub deals: Vec<Deal>,
    pub activities: Vec<Activity>,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyDetail {
    #[serde(flatten)]
    pub company: Company,
    pub contacts: Vec<Contact>,
    pub deals: Vec<Deal>,
    pub activities: Vec<Activity>,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityWithRelations {
    #[serde(flatten)]
    pub activity: Activity,
    pub contact: Option<Contact>,
    pub company: Option<Company>,
    pub deal: Option<Deal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageCount {
    pub name: String,
    pub count: i64,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardView {
    pub contacts_count: i64,
    pub active_deals_count: i64,
    pub pipeline_value: f64,
    pub activities_this_week: i64,
    pub pipeline_data: Vec<StageCount>,
    pub recent_activities: Vec<ActivityWithRelations>,
    pub upcoming_tasks: Vec<ActivityWithRelations>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_size_uses_range_labels() {
        let json = serde_json::to_string(&CompanySize::Enterprise).unwrap();
        assert_eq!(json, "\"500+\"");
        let parsed: CompanySize = serde_json::from_str("\"11-50\"").unwrap();
        assert_eq!(parsed, CompanySize::Small);
        assert_eq!(CompanySize::from_str("51-200"), Ok(CompanySize::Medium));
        assert!(CompanySize::from_str("huge").is_err());
    }

    #[test]
    fn stage_role_terminal_and_accent() {
        assert!(StageRole::Won.is_terminal());
        assert!(StageRole::Lost.is_terminal());
        assert!(!StageRole::Negotiation.is_terminal());
        assert_eq!(StageRole::Won.accent(), "#10b981");
        assert_ne!(StageRole::Lead.accent(), StageRole::Qualified.accent());
    }

    #[test]
    fn stage_role_parse_rejects_names() {
        // Display names are not roles.
        assert!(StageRole::from_str("Closed Won").is_err());
        assert_eq!(StageRole::from_str("won"), Ok(StageRole::Won));
    }

    #[test]
    fn activity_serializes_kind_as_type() {
        let activity = Activity {
            id: 1,
            user_id: 1,
            kind: ActivityType::Meeting,
            title: "Kickoff".into(),
            description: None,
            contact_id: None,
            company_id: None,
            deal_id: None,
            due_date: None,
            completed_at: None,
            is_completed: false,
            created_at: "2025-01-01 00:00:00".into(),
            updated_at: "2025-01-01 00:00:00".into(),
        };
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["type"], "meeting");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn address_emptiness() {
        assert!(Address::default().is_empty());
        let blank = Address {
            city: Some("  ".into()),
            ..Default::default()
        };
        assert!(blank.is_empty());
        let filled = Address {
            city: Some("Lisbon".into()),
            ..Default::default()
        };
        assert!(!filled.is_empty());
    }

    #[test]
    fn close_outcome_maps_to_role() {
        assert_eq!(CloseOutcome::Won.role(), StageRole::Won);
        assert_eq!(CloseOutcome::Lost.role(), StageRole::Lost);
    }
}
