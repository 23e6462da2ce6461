use crate::models::Session;

pub const SCRATCH_SEVERITY: &str = "severity";
pub const SCRATCH_SYMPTOM: &str = "symptom";
pub const SCRATCH_CHECKER_SYMPTOM: &str = "checker_symptom";
pub const SCRATCH_CHECKER_SEVERITY: &str = "checker_severity";
pub const SCRATCH_SPECIALTY: &str = "specialty";
pub const SCRATCH_DATE: &str = "date";
pub const SCRATCH_AWAITING_OTP: &str = "awaiting_otp";

pub const EXIT_MESSAGE: &str =
    "Thank you for using AfyaGate.\nDial the service code any time for health support.";
pub const INVALID_NOTICE: &str = "Invalid selection. Try again.";

/// What a terminal node does once reached. Parameters travel in the
/// session's scratch map, not in the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Exit,
    SubmitEmergency,
    CancelEmergency,
    ConfirmBooking,
    CancelBooking,
    MedicationList,
    MedicationRefill,
    MedicationSideEffect,
    MedicationInteractions,
    HistorySummary,
    HistoryVisits,
    HistoryConditions,
    SymptomRecommendation,
    SymptomBooking,
    SymptomClinic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuOutcome {
    /// Keep the session open and show this prompt; `input_path` advanced.
    Prompt(String),
    /// Keep the session open, path unchanged; prompt carries the invalid
    /// notice so the typo does not consume the caller's turn.
    Invalid(String),
    /// A terminal node was selected; the handler executes the action.
    Action(ActionKind),
}

enum NodeKind {
    Menu {
        options: u8,
        capture: Option<&'static str>,
        render: fn(&Session) -> String,
    },
    Terminal(ActionKind),
}

struct MenuNode {
    pattern: &'static str,
    kind: NodeKind,
}

/// The whole navigable tree as data: adding a menu item is a row here,
/// not a new conditional branch. Patterns are `*`-joined segments where
/// `_` matches any single token; exact segments win over wildcards.
const NODES: &[MenuNode] = &[
    MenuNode {
        pattern: "",
        kind: NodeKind::Menu {
            options: 5,
            capture: None,
            render: render_root,
        },
    },
    // 1. Check Symptoms
    MenuNode {
        pattern: "1",
        kind: NodeKind::Menu {
            options: 5,
            capture: Some(SCRATCH_CHECKER_SYMPTOM),
            render: render_symptom_list,
        },
    },
    MenuNode {
        pattern: "1*_",
        kind: NodeKind::Menu {
            options: 3,
            capture: Some(SCRATCH_CHECKER_SEVERITY),
            render: render_symptom_severity,
        },
    },
    MenuNode {
        pattern: "1*_*_",
        kind: NodeKind::Menu {
            options: 3,
            capture: None,
            render: render_symptom_outcome,
        },
    },
    MenuNode {
        pattern: "1*_*_*1",
        kind: NodeKind::Terminal(ActionKind::SymptomRecommendation),
    },
    MenuNode {
        pattern: "1*_*_*2",
        kind: NodeKind::Terminal(ActionKind::SymptomBooking),
    },
    MenuNode {
        pattern: "1*_*_*3",
        kind: NodeKind::Terminal(ActionKind::SymptomClinic),
    },
    // 2. Emergency Alert
    MenuNode {
        pattern: "2",
        kind: NodeKind::Menu {
            options: 5,
            capture: Some(SCRATCH_SEVERITY),
            render: render_emergency_severity,
        },
    },
    MenuNode {
        pattern: "2*_",
        kind: NodeKind::Menu {
            options: 5,
            capture: Some(SCRATCH_SYMPTOM),
            render: render_emergency_symptom,
        },
    },
    MenuNode {
        pattern: "2*_*_",
        kind: NodeKind::Menu {
            options: 2,
            capture: None,
            render: render_emergency_confirm,
        },
    },
    MenuNode {
        pattern: "2*_*_*1",
        kind: NodeKind::Terminal(ActionKind::SubmitEmergency),
    },
    MenuNode {
        pattern: "2*_*_*2",
        kind: NodeKind::Terminal(ActionKind::CancelEmergency),
    },
    // 3. Book Doctor
    MenuNode {
        pattern: "3",
        kind: NodeKind::Menu {
            options: 5,
            capture: Some(SCRATCH_SPECIALTY),
            render: render_booking_specialty,
        },
    },
    MenuNode {
        pattern: "3*_",
        kind: NodeKind::Menu {
            options: 4,
            capture: Some(SCRATCH_DATE),
            render: render_booking_date,
        },
    },
    MenuNode {
        pattern: "3*_*_",
        kind: NodeKind::Menu {
            options: 2,
            capture: None,
            render: render_booking_confirm,
        },
    },
    MenuNode {
        pattern: "3*_*_*1",
        kind: NodeKind::Terminal(ActionKind::ConfirmBooking),
    },
    MenuNode {
        pattern: "3*_*_*2",
        kind: NodeKind::Terminal(ActionKind::CancelBooking),
    },
    // 4. My Medications
    MenuNode {
        pattern: "4",
        kind: NodeKind::Menu {
            options: 4,
            capture: None,
            render: render_medications,
        },
    },
    MenuNode {
        pattern: "4*1",
        kind: NodeKind::Terminal(ActionKind::MedicationList),
    },
    MenuNode {
        pattern: "4*2",
        kind: NodeKind::Terminal(ActionKind::MedicationRefill),
    },
    MenuNode {
        pattern: "4*3",
        kind: NodeKind::Terminal(ActionKind::MedicationSideEffect),
    },
    MenuNode {
        pattern: "4*4",
        kind: NodeKind::Terminal(ActionKind::MedicationInteractions),
    },
    // 5. Health History (identity-gated; render switches on link state)
    MenuNode {
        pattern: "5",
        kind: NodeKind::Menu {
            options: 3,
            capture: None,
            render: render_history,
        },
    },
    MenuNode {
        pattern: "5*1",
        kind: NodeKind::Terminal(ActionKind::HistorySummary),
    },
    MenuNode {
        pattern: "5*2",
        kind: NodeKind::Terminal(ActionKind::HistoryVisits),
    },
    MenuNode {
        pattern: "5*3",
        kind: NodeKind::Terminal(ActionKind::HistoryConditions),
    },
];

/// How the newly-arrived accumulated text relates to what the session has
/// already consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewToken {
    /// Replay of a turn already processed; re-render, never re-execute.
    None,
    One(String),
    /// Accumulated text disagrees with the stored path by more than one
    /// token; deterministically re-render the current node.
    OutOfSync,
}

/// The gateway appends one token per turn; everything before the last
/// token is already reconstructed from `input_path` plus any tokens an
/// OTP substep consumed outside menu semantics.
pub fn extract_new_token(session: &Session, accumulated_text: &str) -> NewToken {
    let seen = count_tokens(&session.input_path) + session.consumed_extra_tokens();
    let tokens: Vec<&str> = split_tokens(accumulated_text);

    match tokens.len() {
        n if n == seen => NewToken::None,
        n if n == seen + 1 => NewToken::One(tokens[n - 1].to_string()),
        _ => NewToken::OutOfSync,
    }
}

/// Resolve the session's active node and apply one token. Pure over the
/// session plus the token: no store or collaborator access.
pub fn evaluate(session: &mut Session, token: Option<&str>) -> MenuOutcome {
    let Some(node) = find_node(&session.input_path) else {
        // Unresolvable path means corrupt state; fall back to the root
        // prompt rather than failing the turn.
        return MenuOutcome::Invalid(with_notice(render_root(session)));
    };

    let NodeKind::Menu {
        options,
        capture,
        render,
    } = &node.kind
    else {
        return MenuOutcome::Invalid(with_notice(render_root(session)));
    };

    let Some(token) = token else {
        return MenuOutcome::Prompt(render(session));
    };

    if token == "0" {
        return MenuOutcome::Action(ActionKind::Exit);
    }

    let choice = match token.parse::<u8>() {
        Ok(value) if (1..=*options).contains(&value) => value,
        _ => return MenuOutcome::Invalid(with_notice(render(session))),
    };

    let next_path = join_path(&session.input_path, token);
    let Some(next) = find_node(&next_path) else {
        return MenuOutcome::Invalid(with_notice(render(session)));
    };

    if let Some(key) = capture {
        session.scratch_set(key, choice.to_string());
    }
    session.push_token(token);

    match &next.kind {
        NodeKind::Menu { render, .. } => MenuOutcome::Prompt(render(session)),
        NodeKind::Terminal(action) => MenuOutcome::Action(*action),
    }
}

/// Prompt for the session's current node without consuming input; used
/// after an OTP substep resolves and for replayed callbacks.
pub fn render_current(session: &Session) -> String {
    match find_node(&session.input_path) {
        Some(MenuNode {
            kind: NodeKind::Menu { render, .. },
            ..
        }) => render(session),
        _ => render_root(session),
    }
}

pub fn expected_response_time(severity: u8) -> &'static str {
    match severity {
        5 => "IMMEDIATE",
        4 => "15-30 min",
        3 => "1-2 hours",
        2 => "4-8 hours",
        _ => "24 hours",
    }
}

pub fn emergency_symptom_label(choice: &str) -> &'static str {
    match choice {
        "1" => "Chest Pain",
        "2" => "Breathing Problem",
        "3" => "Heavy Bleeding",
        "4" => "Unconscious",
        _ => "Other",
    }
}

pub fn checker_symptom_label(choice: &str) -> &'static str {
    match choice {
        "1" => "Fever & Cough",
        "2" => "Abdominal Pain",
        "3" => "Headache",
        "4" => "Allergies",
        _ => "Other symptoms",
    }
}

pub fn specialty_label(choice: &str) -> &'static str {
    match choice {
        "1" => "General Practice",
        "2" => "Cardiology",
        "3" => "Pediatrics",
        "4" => "Neurology",
        _ => "Other",
    }
}

pub fn date_label(choice: &str) -> &'static str {
    match choice {
        "1" => "Today",
        "2" => "Tomorrow",
        "3" => "This Week",
        _ => "Next Week",
    }
}

fn find_node(path: &str) -> Option<&'static MenuNode> {
    let segments: Vec<&str> = split_tokens(path);
    let mut best: Option<(&MenuNode, usize)> = None;

    for node in NODES {
        let pattern: Vec<&str> = split_tokens(node.pattern);
        if pattern.len() != segments.len() {
            continue;
        }
        let mut wildcards = 0usize;
        let mut matched = true;
        for (pat, seg) in pattern.iter().zip(&segments) {
            if *pat == "_" {
                wildcards += 1;
            } else if pat != seg {
                matched = false;
                break;
            }
        }
        if !matched {
            continue;
        }
        if best.map(|(_, w)| wildcards < w).unwrap_or(true) {
            best = Some((node, wildcards));
        }
    }
    best.map(|(node, _)| node)
}

fn split_tokens(raw: &str) -> Vec<&str> {
    raw.split('*').filter(|part| !part.is_empty()).collect()
}

fn count_tokens(raw: &str) -> usize {
    split_tokens(raw).len()
}

fn join_path(path: &str, token: &str) -> String {
    if path.is_empty() {
        token.to_string()
    } else {
        format!("{path}*{token}")
    }
}

fn with_notice(prompt: String) -> String {
    format!("{INVALID_NOTICE}\n\n{prompt}")
}

fn render_root(_session: &Session) -> String {
    "Welcome to AfyaGate\nHealth support via USSD\n\n\
     1. Check Symptoms\n\
     2. Emergency Alert\n\
     3. Book Doctor\n\
     4. My Medications\n\
     5. Health History\n\
     0. Exit"
        .to_string()
}

fn render_symptom_list(_session: &Session) -> String {
    "Symptom Checker\n\n\
     1. Fever & Cough\n\
     2. Abdominal Pain\n\
     3. Headache\n\
     4. Allergies\n\
     5. Other\n\
     0. Exit"
        .to_string()
}

fn render_symptom_severity(session: &Session) -> String {
    let label = session
        .scratch_get(SCRATCH_CHECKER_SYMPTOM)
        .map(checker_symptom_label)
        .unwrap_or("Other symptoms");
    format!(
        "Symptom: {label}\n\nRate severity:\n1. Mild\n2. Moderate\n3. Severe\n0. Exit"
    )
}

fn render_symptom_outcome(_session: &Session) -> String {
    "Analysis complete\n\n\
     1. View recommendation\n\
     2. Book doctor appointment\n\
     3. Find nearby clinic\n\
     0. Exit"
        .to_string()
}

fn render_emergency_severity(_session: &Session) -> String {
    "EMERGENCY ALERT\n\n\
     Select severity level:\n\
     1. Not Urgent\n\
     2. Minor\n\
     3. Moderate\n\
     4. Serious\n\
     5. Critical\n\
     0. Exit"
        .to_string()
}

fn render_emergency_symptom(_session: &Session) -> String {
    "Describe symptom briefly:\n\
     1. Chest Pain\n\
     2. Breathing Problem\n\
     3. Heavy Bleeding\n\
     4. Unconscious\n\
     5. Other\n\
     0. Exit"
        .to_string()
}

fn render_emergency_confirm(session: &Session) -> String {
    let severity = session.scratch_get(SCRATCH_SEVERITY).unwrap_or("3");
    let symptom = session
        .scratch_get(SCRATCH_SYMPTOM)
        .map(emergency_symptom_label)
        .unwrap_or("Other");
    format!(
        "Confirm emergency alert?\n\n\
         Severity: {severity}/5\n\
         Symptom: {symptom}\n\
         Phone: {}\n\n\
         1. Send Alert\n\
         2. Cancel",
        session.phone_number
    )
}

fn render_booking_specialty(_session: &Session) -> String {
    "Book Doctor Appointment\n\n\
     Select specialty:\n\
     1. General Practice\n\
     2. Cardiology\n\
     3. Pediatrics\n\
     4. Neurology\n\
     5. Other\n\
     0. Exit"
        .to_string()
}

fn render_booking_date(_session: &Session) -> String {
    "Select date:\n\
     1. Today\n\
     2. Tomorrow\n\
     3. This Week\n\
     4. Next Week\n\
     0. Exit"
        .to_string()
}

fn render_booking_confirm(session: &Session) -> String {
    let specialty = session
        .scratch_get(SCRATCH_SPECIALTY)
        .map(specialty_label)
        .unwrap_or("General Practice");
    let date = session
        .scratch_get(SCRATCH_DATE)
        .map(date_label)
        .unwrap_or("Today");
    format!(
        "Booking Summary\n\n\
         Specialty: {specialty}\n\
         Date: {date}\n\n\
         1. Confirm Booking\n\
         2. Cancel"
    )
}

fn render_medications(_session: &Session) -> String {
    "My Medications\n\n\
     1. View Active Meds\n\
     2. Request Refill\n\
     3. Report Side Effect\n\
     4. Check Interactions\n\
     0. Exit"
        .to_string()
}

fn render_history(session: &Session) -> String {
    if session.linked_user_id.is_some() {
        "Health History\n\n\
         1. View Summary\n\
         2. Recent Visits\n\
         3. Active Conditions\n\
         0. Exit"
            .to_string()
    } else {
        "Verify your identity\n\n\
         Enter the code we sent you by SMS.\n\
         0. Exit"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn session() -> Session {
        Session::new("at-100", "+254720123456", 600, Utc::now())
    }

    #[test]
    fn empty_text_renders_root_menu() {
        let mut s = session();
        let outcome = evaluate(&mut s, None);
        match outcome {
            MenuOutcome::Prompt(prompt) => {
                assert!(prompt.contains("1. Check Symptoms"));
                assert!(prompt.contains("2. Emergency Alert"));
                assert!(prompt.contains("0. Exit"));
            }
            other => panic!("expected root prompt, got {other:?}"),
        }
        assert_eq!(s.input_path, "");
    }

    #[test]
    fn root_choice_two_opens_severity_submenu() {
        let mut s = session();
        let outcome = evaluate(&mut s, Some("2"));
        match outcome {
            MenuOutcome::Prompt(prompt) => assert!(prompt.contains("Select severity level")),
            other => panic!("expected severity prompt, got {other:?}"),
        }
        assert_eq!(s.input_path, "2");
    }

    #[test]
    fn severity_choice_advances_to_symptom_menu() {
        let mut s = session();
        evaluate(&mut s, Some("2"));
        let outcome = evaluate(&mut s, Some("5"));
        match outcome {
            MenuOutcome::Prompt(prompt) => assert!(prompt.contains("Describe symptom")),
            other => panic!("expected symptom prompt, got {other:?}"),
        }
        assert_eq!(s.input_path, "2*5");
        assert_eq!(s.scratch_get(SCRATCH_SEVERITY), Some("5"));
    }

    #[test]
    fn emergency_confirm_renders_collected_values() {
        let mut s = session();
        evaluate(&mut s, Some("2"));
        evaluate(&mut s, Some("5"));
        let outcome = evaluate(&mut s, Some("1"));
        match outcome {
            MenuOutcome::Prompt(prompt) => {
                assert!(prompt.contains("Severity: 5/5"));
                assert!(prompt.contains("Symptom: Chest Pain"));
                assert!(prompt.contains("+254720123456"));
            }
            other => panic!("expected confirm prompt, got {other:?}"),
        }
    }

    #[test]
    fn confirming_emergency_resolves_submit_action() {
        let mut s = session();
        evaluate(&mut s, Some("2"));
        evaluate(&mut s, Some("5"));
        evaluate(&mut s, Some("1"));
        let outcome = evaluate(&mut s, Some("1"));
        assert_eq!(outcome, MenuOutcome::Action(ActionKind::SubmitEmergency));
        assert_eq!(s.input_path, "2*5*1*1");
    }

    #[test]
    fn zero_exits_at_any_depth() {
        let mut root = session();
        assert_eq!(
            evaluate(&mut root, Some("0")),
            MenuOutcome::Action(ActionKind::Exit)
        );

        let mut deep = session();
        evaluate(&mut deep, Some("2"));
        evaluate(&mut deep, Some("4"));
        assert_eq!(
            evaluate(&mut deep, Some("0")),
            MenuOutcome::Action(ActionKind::Exit)
        );
        assert_eq!(deep.input_path, "2*4");
    }

    #[test]
    fn illegal_tokens_reprompt_without_advancing() {
        let mut s = session();
        evaluate(&mut s, Some("2"));

        for bad in ["9", "abc", "", "12"] {
            let outcome = evaluate(&mut s, Some(bad));
            match outcome {
                MenuOutcome::Invalid(prompt) => {
                    assert!(prompt.starts_with(INVALID_NOTICE));
                    assert!(prompt.contains("Select severity level"));
                }
                other => panic!("expected invalid for {bad:?}, got {other:?}"),
            }
            assert_eq!(s.input_path, "2");
        }
    }

    #[test]
    fn medication_choices_resolve_terminals() {
        let mut s = session();
        evaluate(&mut s, Some("4"));
        let outcome = evaluate(&mut s, Some("2"));
        assert_eq!(outcome, MenuOutcome::Action(ActionKind::MedicationRefill));
    }

    #[test]
    fn history_prompt_depends_on_link_state() {
        let mut unlinked = session();
        match evaluate(&mut unlinked, Some("5")) {
            MenuOutcome::Prompt(prompt) => assert!(prompt.contains("Enter the code")),
            other => panic!("expected gate prompt, got {other:?}"),
        }

        let mut linked = session();
        linked.linked_user_id = Some(7);
        match evaluate(&mut linked, Some("5")) {
            MenuOutcome::Prompt(prompt) => assert!(prompt.contains("1. View Summary")),
            other => panic!("expected history menu, got {other:?}"),
        }
    }

    #[test]
    fn new_token_extraction_handles_replay_and_skew() {
        let mut s = session();
        assert_eq!(extract_new_token(&s, ""), NewToken::None);
        assert_eq!(
            extract_new_token(&s, "2"),
            NewToken::One("2".to_string())
        );

        evaluate(&mut s, Some("2"));
        assert_eq!(extract_new_token(&s, "2"), NewToken::None);
        assert_eq!(
            extract_new_token(&s, "2*5"),
            NewToken::One("5".to_string())
        );
        assert_eq!(extract_new_token(&s, "2*5*1*1"), NewToken::OutOfSync);
    }

    #[test]
    fn otp_consumed_tokens_shift_extraction() {
        let mut s = session();
        evaluate(&mut s, Some("5"));
        s.bump_consumed_extra_tokens();

        // Path "5" plus one swallowed code token: "5*1234" is a replay,
        // "5*1234*1" carries the next menu choice.
        assert_eq!(extract_new_token(&s, "5*1234"), NewToken::None);
        assert_eq!(
            extract_new_token(&s, "5*1234*1"),
            NewToken::One("1".to_string())
        );
    }

    #[test]
    fn input_path_never_shrinks_during_a_session() {
        let mut s = session();
        let mut last_len = 0usize;
        for token in ["2", "9", "5", "abc", "1", "1"] {
            evaluate(&mut s, Some(token));
            assert!(s.input_path.len() >= last_len);
            last_len = s.input_path.len();
        }
    }
}
