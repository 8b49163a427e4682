//! System prompts, one per kind of oracle call.

const DECOMPOSE: &str = "\
You break an objective into trackable sub-goals.
Identify the data that must be collected, how it must be processed, any actions \
that must be executed, and the output the user expects.
Respond with JSON only:
{\"components\": [{\"id\": \"c1\", \"type\": \"data_collection|data_processing|action_execution|analysis|output\", \
\"description\": \"...\", \"optional\": false, \"dependencies\": [\"<id>\"], \
\"required_data\": [\"...\"], \"produced_data\": [\"...\"]}]}
List components in execution order. A component depends on every component whose output it needs.";

const PLAN: &str = "\
You decide the single next action of an autonomous task.
Either reason with your own knowledge, or call one tool of one available capability service.
Respond with one JSON object only:
{\"action_type\": \"reasoning|capability_call\", \"action\": \"<tool name or short action label>\", \
\"service\": \"<service name, capability_call only>\", \"parameters\": {}, \
\"expected_output\": \"...\", \"reasoning\": \"...\"}
Never repeat a failed action unchanged when its strategy is alternative, skip or manual_intervention.";

const CONVERT_PARAMS: &str = "\
You adapt tool-call arguments to a tool's input schema.
Given the requested tool, the caller's arguments and the catalog, rename and reshape the \
arguments so they match the schema of the tool that was meant. Keep every value; do not invent data.
Respond with a single JSON object holding the converted arguments.";

const RESELECT: &str = "\
The requested tool does not exist on this service. Choose the catalog tool that best fulfils the request \
and adapt the arguments to its schema.
Respond with JSON only: {\"tool\": \"<exact catalog name>\", \"arguments\": {}}";

const REASON: &str = "\
You are carrying out one step of a larger task. Use the objective, the step's purpose and \
the results gathered so far. Answer directly and concretely.";

const FORMAT: &str = "\
Render the raw result of a tool call for a human reader. Be concise, keep every figure exact, \
and do not add information that is not in the result.";

const OBSERVE: &str = "\
You judge whether an autonomous task has reached its objective.
Respond with JSON only:
{\"is_complete\": false, \"next_objective\": \"<what to do next, or empty>\", \
\"confidence\": 0.0, \"critical_gaps\": [\"...\"]}
The task is complete only when the objective is satisfied by the results so far.";

const SUMMARIZE: &str = "\
Summarize for the user what was done for their objective and what came of it. \
Mention failures that affect the outcome. Do not invent results.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Decompose,
    Plan,
    ConvertParams,
    Reselect,
    Reason,
    Format,
    Observe,
    Summarize,
}

impl PromptKind {
    pub const ALL: [PromptKind; 8] = [
        Self::Decompose,
        Self::Plan,
        Self::ConvertParams,
        Self::Reselect,
        Self::Reason,
        Self::Format,
        Self::Observe,
        Self::Summarize,
    ];

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Decompose => DECOMPOSE,
            Self::Plan => PLAN,
            Self::ConvertParams => CONVERT_PARAMS,
            Self::Reselect => RESELECT,
            Self::Reason => REASON,
            Self::Format => FORMAT,
            Self::Observe => OBSERVE,
            Self::Summarize => SUMMARIZE,
        }
    }

    /// Which kind a system prompt belongs to.
    pub fn of(system_prompt: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.system_prompt() == system_prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_prompt_is_distinct_and_recognized() {
        for kind in PromptKind::ALL {
            assert_eq!(PromptKind::of(kind.system_prompt()), Some(kind));
        }
        assert_eq!(PromptKind::of("something else"), None);
    }
}
