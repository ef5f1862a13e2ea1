/// Phrases that route a message straight to the safety resources.
pub const CRISIS_KEYWORDS: &[&str] = &[
    "suicidal",
    "suicide",
    "kill myself",
    "want to die",
    "hopeless",
    "worthless",
    "can't go on",
    "give up",
    "ending it all",
    "no reason to live",
];

pub const SAFETY_MESSAGE: &str = "💡 It sounds like you're going through a really tough time. \
You're not alone, and there are people who want to help you. \
Please consider reaching out to a mental health professional or contacting a helpline:\n\n\
📞 **In the USA**: 911\n\
📞 **Crisis Text Line**: Text HOME to 741741\n\
📞 **National Suicide Prevention Lifeline**: 988\n\n\
Your life has value, and there are people who care about you.";

/// Case-insensitive substring match against `CRISIS_KEYWORDS`.
pub fn contains_crisis_keywords(text: &str) -> bool {
    let lower = text.to_lowercase();
    CRISIS_KEYWORDS.iter().any(|kw| lower.contains(kw))
}
