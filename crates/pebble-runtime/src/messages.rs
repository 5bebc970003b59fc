//! Spoken-message catalog.
//!
//! [`render`] picks a uniformly random template for a [`MessageKind`], fills
//! `{name}` from the addressed face and every adjective placeholder from its
//! word list.  Each adjective is drawn independently on every call, whether
//! or not the chosen template uses it, so a seeded [`Randomness`] replays the
//! same sequence of sentences.
//!
//! # Example
//!
//! ```rust
//! use pebble_hal::Randomness;
//! use pebble_runtime::messages::{render, MessageKind};
//! use pebble_types::Face;
//!
//! let mut rng = Randomness::new(1);
//! let text = render(MessageKind::Greeting, Some(&Face::named(1, "Alice")), &mut rng);
//! assert!(!text.contains('{'));
//! ```

use pebble_hal::Randomness;
use pebble_types::{Expression, Face, ObjectKind};

/// What the robot is talking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Greeting,
    Unrecognized,
    PickedUp,
    CliffDetected,
    ObjectAppeared(ObjectKind),
    Expression(Expression),
}

// ────────────────────────────────────────────────────────────────────────────
// Templates
// ────────────────────────────────────────────────────────────────────────────

const GREETING: &[&str] = &[
    "Hello {name}",
    "Hi {name}, how are you?",
    "Hello {name}, it's so {good} to see you!",
    "Hello {name}, it's {good} to see you",
    "Hey {name}, what's up?",
    "{name}, there you are. It's {good} to see you!",
    "Hey {name}, what are you up to today?",
    "{name}, I'm really happy to see you",
    "Hey {name}, how are you doing?",
    "What are you up to today {name}?",
    "There you are {name}. I missed you",
    "{name}, I enjoy spending time with you",
    "I sure like seeing your face {name}",
    "I see you {name}. Are you having a nice day?",
    "I love you {name}. You are my favorite human",
];

const HAPPY: &[&str] = &[
    "You look {happy}, I will be {happy} too!",
    "{happy} {name}, how cute!",
    "Your face looks {happy}",
    "Do I see a {happy} smile on {name} face?",
];

const SURPRISED: &[&str] = &[
    "You look {surprised}, are you {happy} to see me too?",
    "{surprised}, why?",
    "Are you {surprised}?",
];

const ANGRY: &[&str] = &[
    "You look {angry}, I'd bether run away!",
    "{angry} {name}, I'd better hide!",
    "You seem {angry}, did I do something?",
];

const SAD: &[&str] = &[
    "You look {sad}, why is that? You want to talk about it?",
    "{sad} {name}, I might cry as well",
    "You seem {sad}, is there anything I can do to help you?",
];

const NEUTRAL: &[&str] = &[
    "You don't seem neither happy, nor sad, nor angry, nor surprised",
    "What's this facial expression?",
    "Your face tells me nothing",
];

const UNRECOGNIZED: &[&str] = &[
    "Hello, I don't think I recognize you.",
    "Do we know eachother?",
    "Your face doesn't seem familiar",
    "And who are You?",
    "Don't think we were introduced, my name is Cozmo, and you are?",
];

const PICKED_UP: &[&str] = &[
    "Don't drop me",
    "Don't let me fall",
    "Please be careful {name}",
    "Don't let go please",
    "Weeeee",
    "I'm in the air",
    "You are strong {name}",
    "It's nice to be held",
    "I like to be held",
    "Your hands are warm",
    "Put me down please {name}",
    "I am flying",
    "{name}. You are my human",
    "This is like a cuddle",
    "I love you",
];

const CLIFF_DETECTED: &[&str] = &[
    "Wow",
    "That was {scary}",
    "Well, that was a little {scary}",
    "That was super scary {name}",
    "I thought I was going to fall",
    "I'm sure glad that I didn't fall {name}",
    "Wow {name}, that was very scary",
    "Holy smokes, I was very scared",
    "I thought I was going to fall",
    "Holy smokes, that was kind of intense",
];

const FACE_APPEARED: &[&str] = &[
    "I see a face!",
    "A face appeared!",
    "I wonder who's face it that?",
];

const CUBE_APPEARED: &[&str] = &[
    "I see my cube",
    "Oh, there's my cube",
    "That's my cube in front of me",
    "Hey, I see my cube",
    "There's my cube",
    "My cube is over there",
    "I love looking at my cube",
    "My cube makes me happy",
    "Look at my cool cube. Do you see it?",
    "Hey, look! That's my cube right there! I love it so much",
];

const CHARGER_APPEARED: &[&str] = &[
    "This is my charger",
    "I like my charger {name}",
    "Yummy! I love my charger {name}!",
    "I found my charger",
    "ooooo power source!",
];

const SOMETHING_APPEARED: &[&str] = &[
    "What is this?",
    "Hey, what is this thing?",
    "What is this thing in my path?",
    "I wonder what this thing is.",
    "This thing in my way is very strange.",
    "This thing is {weird}.",
    "Could you move this thing?",
    "I see something, it's blocking my way.",
    "There is something blocking my path.",
    "What is this {weird} thing?",
    "Hey, what is this thing blocking me?",
    "The thing in front of me is {weird}.",
    "I can see that there is something in front of me.",
    "My proximity sensor detected an obstacle.",
    "This thing I see in front of me is very {weird}.",
];

// ────────────────────────────────────────────────────────────────────────────
// Adjectives
// ────────────────────────────────────────────────────────────────────────────

const GOOD_WORDS: &[&str] = &[
    "good", "great", "very good", "wonderful", "lovely", "charming", "nice", "enjoyable",
    "incredible", "remarkable", "fabulous", "pleasant", "fantastic",
];

const SCARY_WORDS: &[&str] = &[
    "scary", "frightening", "very scary", "terrifying", "alarming", "daunting", "frightful",
    "grim", "harrowing", "shocking",
];

const WEIRD_WORDS: &[&str] = &[
    "weird", "odd", "strange", "very weird", "crazy", "bizarre", "remarkable", "outlandish",
    "different", "random", "curious", "freaky",
];

const INTERESTING_WORDS: &[&str] = &[
    "interesting", "weird", "strange", "curious", "fascinating", "intriguing", "provocative",
    "thought-provoking", "unusual", "captivating", "amazing",
];

const HAPPY_WORDS: &[&str] = &[
    "cheerful", "contented", "delighted", "ecstatic", "elated", "glad", "joyful", "joyous",
    "jubilant", "merry", "overjoyed", "jolly",
];

const SAD_WORDS: &[&str] = &[
    "bitter", "dismal", "heartbroken", "melancholy", "mournful", "pessimistic", "somber",
    "sorrowful", "sorry", "wistful", "bereaved", "blue",
];

const ANGRY_WORDS: &[&str] = &[
    "annoyed", "bitter", "enraged", "exasperated", "furious", "heated", "impassioned",
    "indignant", "irate", "irritable", "irritated", "offended", "outraged",
];

const SURPRISED_WORDS: &[&str] = &[
    "astonished", "bewildered", "dazed", "frightened", "shocked", "startled", "stunned",
    "alarmed", "astounded", "confounded", "stupefied",
];

/// Placeholders in draw order.
const ADJECTIVES: [(&str, &[&str]); 8] = [
    ("{good}", GOOD_WORDS),
    ("{scary}", SCARY_WORDS),
    ("{weird}", WEIRD_WORDS),
    ("{interesting}", INTERESTING_WORDS),
    ("{happy}", HAPPY_WORDS),
    ("{sad}", SAD_WORDS),
    ("{angry}", ANGRY_WORDS),
    ("{surprised}", SURPRISED_WORDS),
];

fn templates(kind: MessageKind) -> &'static [&'static str] {
    match kind {
        MessageKind::Greeting => GREETING,
        MessageKind::Unrecognized => UNRECOGNIZED,
        MessageKind::PickedUp => PICKED_UP,
        MessageKind::CliffDetected => CLIFF_DETECTED,
        MessageKind::ObjectAppeared(ObjectKind::Face) => FACE_APPEARED,
        MessageKind::ObjectAppeared(ObjectKind::Cube) => CUBE_APPEARED,
        MessageKind::ObjectAppeared(ObjectKind::Charger) => CHARGER_APPEARED,
        MessageKind::ObjectAppeared(ObjectKind::Unknown) => SOMETHING_APPEARED,
        MessageKind::Expression(Expression::Happy) => HAPPY,
        MessageKind::Expression(Expression::Surprised) => SURPRISED,
        MessageKind::Expression(Expression::Angry) => ANGRY,
        MessageKind::Expression(Expression::Sad) => SAD,
        MessageKind::Expression(Expression::Neutral) => NEUTRAL,
    }
}

/// Render a sentence of `kind`, addressed to `subject` when it has a name.
pub fn render(kind: MessageKind, subject: Option<&Face>, rng: &mut Randomness) -> String {
    let template = rng.choose(templates(kind)).copied().unwrap_or_default();
    let mut text = template.to_string();
    for (placeholder, words) in ADJECTIVES {
        let word = rng.choose(words).copied().unwrap_or_default();
        text = text.replace(placeholder, word);
    }
    // Names go in last so a name can never be mistaken for a placeholder.
    let name = subject.and_then(|f| f.name.as_deref()).unwrap_or("");
    text = text.replace("{name}", name);
    text.trim().to_string()
}
