//! Survey instruments, demographics and answer validation.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::AnswerPolicy;
use crate::error::FieldIssue;

pub const MIN_AGE: i64 = 18;
pub const MAX_AGE: i64 = 60;
pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// A single survey question. `key` becomes part of the column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Item {
    pub key: &'static str,
    pub label: &'static str,
}

/// A validated questionnaire rated on a 1–5 scale.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Instrument {
    pub key: &'static str,
    pub title: &'static str,
    pub instruction: &'static str,
    /// Anchor labels for ratings 1 through 5.
    pub scale: [&'static str; 5],
    pub items: &'static [Item],
}

pub const PANAS: Instrument = Instrument {
    key: "panas",
    title: "Samopoczucie",
    instruction: "Poniżej znajduje się lista przymiotników opisujących różne stany emocjonalne. \
                  Proszę określić, jak bardzo obecnie czujesz się w sposób opisany przez każde z nich.",
    scale: ["bardzo słabo", "słabo", "umiarkowanie", "silnie", "bardzo silnie"],
    items: &[
        Item {
            key: "Zainteresowany/a",
            label: "Zainteresowany/a",
        },
        Item {
            key: "Podekscytowany/a",
            label: "Podekscytowany/a",
        },
        Item {
            key: "Zdecydowany/a",
            label: "Zdecydowany/a",
        },
        Item {
            key: "Aktywny/a",
            label: "Aktywny/a",
        },
        Item {
            key: "Entuzjastyczny/a",
            label: "Entuzjastyczny/a",
        },
        Item {
            key: "Zaniepokojony/a",
            label: "Zaniepokojony/a",
        },
        Item {
            key: "Przygnębiony/a",
            label: "Przygnębiony/a",
        },
        Item {
            key: "Zdenerwowany/a",
            label: "Zdenerwowany/a",
        },
        Item {
            key: "Wrogi/a",
            label: "Wrogi/a",
        },
        Item {
            key: "Winny/a",
            label: "Winny/a",
        },
    ],
};

pub const SELF_COMPASSION: Instrument = Instrument {
    key: "self_compassion",
    title: "Samowspółczucie",
    instruction: "Przeczytaj uważnie każde ze zdań i oceń, jak często zazwyczaj tak się czujesz lub zachowujesz.",
    scale: ["Prawie nigdy", "Rzadko", "Czasami", "Często", "Prawie zawsze"],
    items: &[
        Item {
            key: "SCS_1",
            label: "Kiedy nie powiedzie mi się coś ważnego, ogarnia mnie uczucie, że nie jestem taki jak trzeba.",
        },
        Item {
            key: "SCS_2",
            label: "Staram się być wyrozumiały i cierpliwy w stosunku do tych aspektów mojej osoby, których nie lubię.",
        },
        Item {
            key: "SCS_3",
            label: "Kiedy zdarza się coś bolesnego, staram się zachować wyważony ogląd sytuacji.",
        },
        Item {
            key: "SCS_4",
            label: "Gdy jestem przygnębiony, mam zwykle poczucie, że inni ludzie są prawdopodobnie szczęśliwsi ode mnie.",
        },
        Item {
            key: "SCS_5",
            label: "Staram się patrzeć na swoje wady lub błędy jako na nieodłączny aspekt bycia człowiekiem.",
        },
        Item {
            key: "SCS_6",
            label: "Kiedy przechodzę przez bardzo trudny okres, staram się być łagodny i troskliwy w stosunku do siebie.",
        },
        Item {
            key: "SCS_7",
            label: "Kiedy coś mnie denerwuje, staram się zachować równowagę emocjonalną.",
        },
        Item {
            key: "SCS_8",
            label: "Kiedy nie powiedzie mi się coś ważnego, zazwyczaj czuję się w tym osamotniony.",
        },
        Item {
            key: "SCS_9",
            label: "Kiedy czuję się przygnębiony, nadmiernie skupiam się na wszystkim, co idzie źle.",
        },
        Item {
            key: "SCS_10",
            label: "Kiedy czuję się jakoś gorsza/gorszy, staram się pamiętać, że większość ludzi tak ma.",
        },
        Item {
            key: "SCS_11",
            label: "Jestem krytyczny i mało wyrozumiały wobec moich własnych wad i niedociągnięć.",
        },
        Item {
            key: "SCS_12",
            label: "Jestem nietolerancyjny i niecierpliwy wobec tych aspektów mojej osoby, których nie lubię.",
        },
    ],
};

pub const AI_ATTITUDE: Instrument = Instrument {
    key: "ai_attitude",
    title: "Postawa wobec AI",
    instruction: "Zaznacz, na ile zgadzasz się z każdym ze stwierdzeń.",
    scale: [
        "Zdecydowanie się nie zgadzam",
        "Raczej się nie zgadzam",
        "Ani się zgadzam, ani nie zgadzam",
        "Raczej się zgadzam",
        "Zdecydowanie się zgadzam",
    ],
    items: &[
        Item {
            key: "ai_1",
            label: "Sztuczna inteligencja uczyni ten świat lepszym miejscem.",
        },
        Item {
            key: "ai_2",
            label: "Sztuczna inteligencja ma więcej wad niż zalet.",
        },
        Item {
            key: "ai_3",
            label: "Sztuczna inteligencja oferuje rozwiązania wielu światowych problemów.",
        },
        Item {
            key: "ai_4",
            label: "Sztuczna inteligencja raczej tworzy problemy niż je rozwiązuje.",
        },
    ],
};

/// An instrument placed in a survey. Answers are stored under
/// `<section key>_<item key>` columns.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Section {
    pub key: &'static str,
    pub instrument: &'static Instrument,
}

impl Section {
    pub fn column(&self, item: &Item) -> String {
        format!("{}_{}", self.key, item.key)
    }
}

pub const PRETEST_SECTIONS: [Section; 3] = [
    Section {
        key: "pre_panas",
        instrument: &PANAS,
    },
    Section {
        key: "pre_self_compassion",
        instrument: &SELF_COMPASSION,
    },
    Section {
        key: "pre_ai_attitude",
        instrument: &AI_ATTITUDE,
    },
];

pub const POSTTEST_SECTIONS: [Section; 2] = [
    Section {
        key: "post_panas",
        instrument: &PANAS,
    },
    Section {
        key: "post_self_compassion",
        instrument: &SELF_COMPASSION,
    },
];

pub const REFLECTION_PROMPT: &str = "Jak myślisz, o co chodziło w tym badaniu?";

/// A stored survey answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Rating(u8),
    Text(String),
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rating(r) => write!(f, "{r}"),
            Self::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Answers keyed by section, then item. `None` means the item was left blank.
pub type RatingSubmission = BTreeMap<String, BTreeMap<String, Option<i64>>>;

/// Validated answers keyed by section, then item.
pub type AnswerSet = BTreeMap<String, BTreeMap<String, Answer>>;

/// Check a rating submission against `sections`.
///
/// Every problem is pushed onto `issues`; the returned set is only meaningful
/// when no issue was added.
pub fn validate_ratings(
    sections: &[Section],
    submitted: &RatingSubmission,
    policy: AnswerPolicy,
    default_rating: u8,
    issues: &mut Vec<FieldIssue>,
) -> AnswerSet {
    for (section_key, items) in submitted {
        let Some(section) = sections.iter().find(|s| s.key == section_key) else {
            issues.push(FieldIssue::new(
                format!("answers.{section_key}"),
                "unknown survey section",
            ));
            continue;
        };
        for item_key in items.keys() {
            if !section.instrument.items.iter().any(|i| i.key == item_key) {
                issues.push(FieldIssue::new(
                    format!("answers.{section_key}.{item_key}"),
                    "unknown survey item",
                ));
            }
        }
    }

    let mut answers = AnswerSet::new();
    for section in sections {
        let given = submitted.get(section.key);
        let mut section_answers = BTreeMap::new();
        for item in section.instrument.items {
            let field = format!("answers.{}.{}", section.key, item.key);
            match given.and_then(|items| items.get(item.key)).copied().flatten() {
                Some(rating) if (MIN_RATING as i64..=MAX_RATING as i64).contains(&rating) => {
                    section_answers.insert(item.key.to_string(), Answer::Rating(rating as u8));
                }
                Some(rating) => issues.push(FieldIssue::new(
                    field,
                    format!("rating {rating} is outside {MIN_RATING}-{MAX_RATING}"),
                )),
                None => match policy {
                    AnswerPolicy::AcceptDefault => {
                        section_answers
                            .insert(item.key.to_string(), Answer::Rating(default_rating));
                    }
                    AnswerPolicy::RequireExplicit => {
                        issues.push(FieldIssue::new(field, "an answer is required"));
                    }
                },
            }
        }
        answers.insert(section.key.to_string(), section_answers);
    }
    answers
}

macro_rules! closed_set {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn label(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            pub fn labels() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.label()).collect()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.label() == s.trim())
                    .ok_or_else(|| format!("expected one of: {}", Self::labels().join(", ")))
            }
        }
    };
}

closed_set!(
    /// Self-reported gender. Also picks the persona's form of address.
    Gender {
        Female => "Kobieta",
        Male => "Mężczyzna",
        Other => "Inna",
        Undisclosed => "Nie chcę podać",
    }
);

closed_set!(
    /// Highest completed level of education.
    Education {
        Primary => "Podstawowe",
        LowerSecondary => "Gimnazjalne",
        Vocational => "Zasadnicze zawodowe",
        Secondary => "Średnie",
        PostSecondary => "Pomaturalne",
        Bachelor => "Wyższe licencjackie/inżynierskie",
        Master => "Wyższe magisterskie",
        Doctorate => "Doktoranckie lub wyższe",
        Other => "Inne",
        Undisclosed => "Nie chcę podać",
    }
);

closed_set!(
    Employment {
        FullTime => "Praca na pełen etat",
        PartTime => "Praca w niepełnym wymiarze",
        Student => "Nauka",
        Unemployed => "Bez pracy",
        Retired => "Emerytura lub renta",
        Other => "Inne",
        Undisclosed => "Nie chcę podać",
    }
);

/// Raw demographics as posted by a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DemographicsInput {
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub education: Option<String>,
    #[serde(default)]
    pub employment: Option<String>,
}

/// Validated demographics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Demographics {
    pub age: u8,
    pub gender: Gender,
    pub education: Education,
    pub employment: Option<Employment>,
}

impl Demographics {
    /// Validate every field, pushing one issue per problem.
    pub fn validate(input: &DemographicsInput, issues: &mut Vec<FieldIssue>) -> Option<Self> {
        let before = issues.len();

        let age = match input.age {
            Some(age) if (MIN_AGE..=MAX_AGE).contains(&age) => Some(age as u8),
            Some(age) => {
                issues.push(FieldIssue::new(
                    "demographics.age",
                    format!("age {age} is outside {MIN_AGE}-{MAX_AGE}"),
                ));
                None
            }
            None => {
                issues.push(FieldIssue::new("demographics.age", "age is required"));
                None
            }
        };
        let gender = required_choice::<Gender>("demographics.gender", &input.gender, issues);
        let education =
            required_choice::<Education>("demographics.education", &input.education, issues);
        let employment = match input.employment.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match raw.parse::<Employment>() {
                Ok(e) => Some(e),
                Err(message) => {
                    issues.push(FieldIssue::new("demographics.employment", message));
                    None
                }
            },
        };

        if issues.len() != before {
            return None;
        }
        Some(Self {
            age: age?,
            gender: gender?,
            education: education?,
            employment,
        })
    }

    /// `demographics_*` columns in display order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("demographics_age", self.age.to_string()),
            ("demographics_gender", self.gender.to_string()),
            ("demographics_education", self.education.to_string()),
        ];
        if let Some(employment) = self.employment {
            fields.push(("demographics_employment", employment.to_string()));
        }
        fields
    }
}

fn required_choice<T: FromStr<Err = String>>(
    field: &str,
    raw: &Option<String>,
    issues: &mut Vec<FieldIssue>,
) -> Option<T> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => {
            issues.push(FieldIssue::new(field, "a choice is required"));
            None
        }
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(message) => {
                issues.push(FieldIssue::new(field, message));
                None
            }
        },
    }
}
