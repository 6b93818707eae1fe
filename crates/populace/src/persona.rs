//! Agent archetypes and the tier tables derived from them.

use std::ops::RangeInclusive;

use engine::world::Skill;
use engine::SafetyTier;
use rand::Rng;
use serde::{Deserialize, Serialize};

const GOOD_KARMA_FLOOR: i32 = 25;
const EVIL_KARMA_CEILING: i32 = -25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Profile {
    Killer,
    Crafter,
    Adventurer,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Killer, Profile::Crafter, Profile::Adventurer];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "killer" | "pk" => Some(Self::Killer),
            "crafter" => Some(Self::Crafter),
            "adventurer" => Some(Self::Adventurer),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Killer => "Killer",
            Self::Crafter => "Crafter",
            Self::Adventurer => "Adventurer",
        }
    }

    pub fn karma_range(self) -> RangeInclusive<i32> {
        match self {
            Self::Killer => -120..=-30,
            Self::Crafter => -10..=20,
            Self::Adventurer => 30..=120,
        }
    }

    pub fn is_killer(self) -> bool {
        self == Self::Killer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExperienceTier {
    Newbie,
    Average,
    Proficient,
    Grandmaster,
}

impl ExperienceTier {
    pub const ALL: [ExperienceTier; 4] = [
        ExperienceTier::Newbie,
        ExperienceTier::Average,
        ExperienceTier::Proficient,
        ExperienceTier::Grandmaster,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "newbie" => Some(Self::Newbie),
            "average" => Some(Self::Average),
            "proficient" => Some(Self::Proficient),
            "grandmaster" | "gm" => Some(Self::Grandmaster),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Newbie => "Newbie",
            Self::Average => "Average",
            Self::Proficient => "Proficient",
            Self::Grandmaster => "Grandmaster",
        }
    }

    pub fn stat_range(self) -> RangeInclusive<u16> {
        match self {
            Self::Newbie => 20..=45,
            Self::Average => 40..=70,
            Self::Proficient => 60..=90,
            Self::Grandmaster => 80..=100,
        }
    }

    pub fn skill_range(self) -> RangeInclusive<f32> {
        match self {
            Self::Newbie => 20.0..=45.0,
            Self::Average => 45.0..=70.0,
            Self::Proficient => 70.0..=90.0,
            Self::Grandmaster => 90.0..=100.0,
        }
    }

    pub fn power_multiplier(self) -> f32 {
        match self {
            Self::Newbie => 0.60,
            Self::Average => 0.85,
            Self::Proficient => 1.00,
            Self::Grandmaster => 1.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlignmentBand {
    Good,
    Neutral,
    Evil,
}

impl AlignmentBand {
    pub fn from_karma(karma: i32) -> Self {
        if karma > GOOD_KARMA_FLOOR {
            Self::Good
        } else if karma < EVIL_KARMA_CEILING {
            Self::Evil
        } else {
            Self::Neutral
        }
    }

    pub fn is_opposed_to(self, other: AlignmentBand) -> bool {
        matches!(
            (self, other),
            (Self::Good, Self::Evil) | (Self::Evil, Self::Good)
        )
    }
}

/// Fighting preference fixed when the agent is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatStyle {
    Melee(Skill),
    Ranged,
}

impl CombatStyle {
    pub fn skill(self) -> Skill {
        match self {
            Self::Melee(skill) => skill,
            Self::Ranged => Skill::Archery,
        }
    }

    pub fn is_ranged(self) -> bool {
        self == Self::Ranged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Persona {
    pub profile: Profile,
    pub tier: ExperienceTier,
}

impl Persona {
    pub fn new(profile: Profile, tier: ExperienceTier) -> Self {
        Self { profile, tier }
    }

    /// Profile weighted by how dangerous the region is; tier weighted toward
    /// the middle of the table.
    pub fn random_for_region<R: Rng + ?Sized>(safety: SafetyTier, rng: &mut R) -> Self {
        let (killer, crafter, adventurer) = match safety {
            SafetyTier::Guarded => (10, 45, 45),
            SafetyTier::Contested => (30, 35, 35),
            SafetyTier::Lawless => (60, 15, 25),
        };
        let profile_weights = [
            (Profile::Killer, killer),
            (Profile::Crafter, crafter),
            (Profile::Adventurer, adventurer),
        ];
        let profile = weighted_pick(rng, &profile_weights).unwrap_or(Profile::Crafter);
        Self::new(profile, Self::random_tier(rng))
    }

    pub fn random_tier<R: Rng + ?Sized>(rng: &mut R) -> ExperienceTier {
        let weights = [
            (ExperienceTier::Newbie, 25),
            (ExperienceTier::Average, 40),
            (ExperienceTier::Proficient, 25),
            (ExperienceTier::Grandmaster, 10),
        ];
        weighted_pick(rng, &weights).unwrap_or(ExperienceTier::Average)
    }

    pub fn roll_karma<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        rng.gen_range(self.profile.karma_range())
    }

    pub fn roll_stat<R: Rng + ?Sized>(&self, rng: &mut R) -> u16 {
        rng.gen_range(self.tier.stat_range())
    }

    pub fn roll_skill<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        let value: f32 = rng.gen_range(self.tier.skill_range());
        (value * 10.0).round() / 10.0
    }

    /// Best guess for a body that was never registered, e.g. found in the
    /// world after a restart.
    pub fn infer_from_karma(karma: i32, combat_skill: f32) -> Self {
        let profile = match AlignmentBand::from_karma(karma) {
            AlignmentBand::Evil => Profile::Killer,
            AlignmentBand::Neutral => Profile::Crafter,
            AlignmentBand::Good => Profile::Adventurer,
        };
        let tier = ExperienceTier::ALL
            .into_iter()
            .rev()
            .find(|tier| combat_skill >= *tier.skill_range().start())
            .unwrap_or(ExperienceTier::Newbie);
        Self::new(profile, tier)
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.tier.label(), self.profile.label())
    }
}

pub(crate) fn weighted_pick<R: Rng + ?Sized, T: Copy>(
    rng: &mut R,
    weights: &[(T, u32)],
) -> Option<T> {
    let total: u32 = weights.iter().map(|(_, weight)| *weight).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.gen_range(0..total);
    for (value, weight) in weights {
        if roll < *weight {
            return Some(*value);
        }
        roll -= weight;
    }
    None
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn karma_bands_split_at_twenty_five() {
        assert_eq!(AlignmentBand::from_karma(26), AlignmentBand::Good);
        assert_eq!(AlignmentBand::from_karma(25), AlignmentBand::Neutral);
        assert_eq!(AlignmentBand::from_karma(-25), AlignmentBand::Neutral);
        assert_eq!(AlignmentBand::from_karma(-26), AlignmentBand::Evil);
        assert!(AlignmentBand::Good.is_opposed_to(AlignmentBand::Evil));
        assert!(!AlignmentBand::Good.is_opposed_to(AlignmentBand::Neutral));
    }

    #[test]
    fn rolled_values_stay_inside_tier_tables() {
        let mut rng = SmallRng::seed_from_u64(3);
        for profile in Profile::ALL {
            for tier in ExperienceTier::ALL {
                let persona = Persona::new(profile, tier);
                for _ in 0..50 {
                    assert!(tier.stat_range().contains(&persona.roll_stat(&mut rng)));
                    let skill = persona.roll_skill(&mut rng);
                    assert!(skill >= *tier.skill_range().start() - 0.05);
                    assert!(skill <= *tier.skill_range().end() + 0.05);
                    assert!(profile.karma_range().contains(&persona.roll_karma(&mut rng)));
                }
            }
        }
    }

    #[test]
    fn killer_karma_always_lands_in_evil_band() {
        let mut rng = SmallRng::seed_from_u64(5);
        let persona = Persona::new(Profile::Killer, ExperienceTier::Average);
        for _ in 0..100 {
            assert_eq!(
                AlignmentBand::from_karma(persona.roll_karma(&mut rng)),
                AlignmentBand::Evil
            );
        }
    }

    #[test]
    fn lawless_regions_lean_toward_killers() {
        let mut rng = SmallRng::seed_from_u64(17);
        let mut killers = |safety| {
            (0..1000)
                .filter(|_| Persona::random_for_region(safety, &mut rng).profile.is_killer())
                .count()
        };
        let guarded = killers(SafetyTier::Guarded);
        let lawless = killers(SafetyTier::Lawless);
        assert!(lawless > guarded * 3, "guarded={guarded} lawless={lawless}");
    }

    #[test]
    fn inferred_persona_follows_karma_and_skill() {
        let persona = Persona::infer_from_karma(-80, 92.0);
        assert_eq!(persona, Persona::new(Profile::Killer, ExperienceTier::Grandmaster));
        let persona = Persona::infer_from_karma(0, 10.0);
        assert_eq!(persona, Persona::new(Profile::Crafter, ExperienceTier::Newbie));
    }
}
