//! Public protocol structs for the HTTP API (serde ready).
//! Keep this small and stable to evolve backend and clients independently.

use serde::{Deserialize, Serialize};

use crate::achievement::Achievement;
use crate::challenge::Challenge;
use crate::domain::ProjectState;
use crate::quest::Quest;

/// Shown instead of a diff when the mutated line cannot be reconstructed.
pub const MUTATION_FALLBACK: &str = "The mutated line could not be shown, please look at the mutation report";

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterIn {
    pub user: String,
    pub project: String,
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
    /// Commit author names or e-mails that belong to this user.
    #[serde(default, rename = "gitNames")]
    pub git_names: Vec<String>,
    #[serde(default)]
    pub team: Option<String>,
}

/// Body of reject, restore, store and undo_store. `challenge` is the id or
/// the (escaped) display text of the challenge.
#[derive(Debug, Deserialize)]
pub struct ChallengeActionIn {
    pub user: String,
    pub project: String,
    pub challenge: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendIn {
    pub user: String,
    pub to: String,
    pub project: String,
    pub challenge: String,
}

#[derive(Debug, Deserialize)]
pub struct QuestRejectIn {
    pub user: String,
    pub project: String,
    pub quest: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterOut {
    pub user: String,
    pub project: String,
    pub pseudonym: String,
}

#[derive(Debug, Serialize)]
pub struct ChallengeOut {
    pub id: String,
    pub kind: &'static str,
    pub text: String,
    /// Matching key for follow-up actions.
    pub escaped: String,
    pub score: u32,
    pub created: i64,
    pub solved: i64,
    #[serde(rename = "mutatedLine", skip_serializing_if = "Option::is_none")]
    pub mutated_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuestOut {
    pub id: String,
    pub text: String,
    pub escaped: String,
    pub score: u32,
    #[serde(rename = "currentStep")]
    pub current_step: usize,
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AchievementOut {
    pub title: String,
    pub description: String,
    pub solved: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectStateOut {
    pub user: String,
    pub project: String,
    pub score: u64,
    pub participating: bool,
    pub team: Option<String>,
    #[serde(rename = "currentChallenges")]
    pub current_challenges: Vec<ChallengeOut>,
    #[serde(rename = "completedChallenges")]
    pub completed_challenges: Vec<ChallengeOut>,
    #[serde(rename = "rejectedChallenges")]
    pub rejected_challenges: Vec<ChallengeOut>,
    #[serde(rename = "storedChallenges")]
    pub stored_challenges: Vec<ChallengeOut>,
    #[serde(rename = "currentQuests")]
    pub current_quests: Vec<QuestOut>,
    #[serde(rename = "completedQuests")]
    pub completed_quests: Vec<QuestOut>,
    #[serde(rename = "rejectedQuests")]
    pub rejected_quests: Vec<QuestOut>,
    #[serde(rename = "unsolvedAchievements")]
    pub unsolved_achievements: Vec<AchievementOut>,
    #[serde(rename = "completedAchievements")]
    pub completed_achievements: Vec<AchievementOut>,
}

/// Convert a challenge into its public DTO. The mutation diff is rendered
/// here, on presentation.
pub fn challenge_out(c: &Challenge, reason: Option<&str>) -> ChallengeOut {
    ChallengeOut {
        id: c.id.to_string(),
        kind: c.name(),
        text: c.to_string(),
        escaped: c.to_escaped_string(),
        score: c.score(),
        created: c.created,
        solved: c.solved,
        mutated_line: c.mutated_line().map(|l| {
            if l.is_empty() {
                MUTATION_FALLBACK.to_string()
            } else {
                l
            }
        }),
        reason: reason.map(str::to_string),
    }
}

pub fn quest_out(q: &Quest, reason: Option<&str>) -> QuestOut {
    QuestOut {
        id: q.id.to_string(),
        text: q.to_string(),
        escaped: q.to_escaped_string(),
        score: q.score(),
        current_step: q.current_step,
        steps: q.steps.iter().map(|s| s.description.clone()).collect(),
        reason: reason.map(str::to_string),
    }
}

/// Secret achievements keep their description hidden until unlocked.
pub fn achievement_out(a: &Achievement) -> AchievementOut {
    let description = if a.def.secret && a.solved_time == 0 {
        "???".to_string()
    } else {
        a.def.description.clone()
    };
    AchievementOut { title: a.def.title.clone(), description, solved: a.solved_time_string() }
}

pub fn project_state_out(user: &str, project: &str, p: &ProjectState) -> ProjectStateOut {
    ProjectStateOut {
        user: user.to_string(),
        project: project.to_string(),
        score: p.score,
        participating: p.participating,
        team: p.team.clone(),
        current_challenges: p.current_challenges().into_iter().map(|c| challenge_out(c, None)).collect(),
        completed_challenges: p.completed_challenges().into_iter().map(|c| challenge_out(c, None)).collect(),
        rejected_challenges: p
            .rejected_challenges()
            .into_iter()
            .map(|(c, r)| challenge_out(c, Some(r)))
            .collect(),
        stored_challenges: p.stored_challenges().into_iter().map(|c| challenge_out(c, None)).collect(),
        current_quests: p.current_quests().into_iter().map(|q| quest_out(q, None)).collect(),
        completed_quests: p.completed_quests().into_iter().map(|q| quest_out(q, None)).collect(),
        rejected_quests: p.rejected_quests().into_iter().map(|(q, r)| quest_out(q, Some(r))).collect(),
        unsolved_achievements: p.unsolved_achievements().iter().map(achievement_out).collect(),
        completed_achievements: p.completed_achievements().iter().map(achievement_out).collect(),
    }
}
