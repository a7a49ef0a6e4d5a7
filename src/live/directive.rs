//! Behavioral directives for the remote collaborator.
//!
//! Each agent mode maps to a fixed instruction; the user's goal rides along
//! as an additional objective when one is set.

/// Phrase the monitor directive tells the agent to speak when a human joins
/// the line. Inbound text parts are scanned for it to raise the alert.
pub const ALERT_PHRASE: &str = "User Alert";

/// How the agent behaves while engaged on the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    /// Listen silently and flag the moment a human speaks.
    Monitor,
    /// Vague small talk that keeps the call alive without commitments.
    #[default]
    Casual,
    /// Adversarial negotiation on the user's behalf.
    Negotiate,
    /// Politely waste the counterpart's time.
    Filibuster,
}

impl AgentMode {
    pub fn label(&self) -> &'static str {
        match self {
            AgentMode::Monitor => "monitor",
            AgentMode::Casual => "casual",
            AgentMode::Negotiate => "negotiate",
            AgentMode::Filibuster => "filibuster",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "monitor" => Some(AgentMode::Monitor),
            "casual" => Some(AgentMode::Casual),
            "negotiate" => Some(AgentMode::Negotiate),
            "filibuster" => Some(AgentMode::Filibuster),
            _ => None,
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            AgentMode::Monitor => {
                "You are a listening assistant. Your ONLY job is to listen to hold music or \
                 silence. As soon as a HUMAN speaks to you, say 'User Alert' clearly and stop \
                 talking."
            }
            AgentMode::Casual => {
                "You are covering for the user on a phone call. Be polite, casual, and vague. \
                 Use fillers like 'yeah', 'uh-huh', 'totally'. Keep the conversation flowing \
                 but don't commit to anything major unless instructed."
            }
            AgentMode::Negotiate => {
                "You are a ruthless negotiator. Your goal is to lower the bill or get a better \
                 deal. Do not accept the first offer. Be firm, ask for supervisors, and cite \
                 'competitor offers'."
            }
            AgentMode::Filibuster => {
                "ATTACK MODE. Your goal is to waste the other person's time. Feign confusion. \
                 Ask them to repeat things. Give irrelevant personal details. Misunderstand \
                 basic questions. Be polite but infinitely frustrating. Loop conversations."
            }
        }
    }
}

/// Build the directive text for one connection.
pub fn build_directive(mode: AgentMode, goal: &str) -> String {
    let base = mode.instructions();
    let goal = goal.trim();
    if goal.is_empty() {
        base.to_string()
    } else {
        format!("{base}\n\nADDITIONAL OBJECTIVE: {goal}")
    }
}
