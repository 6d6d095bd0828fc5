//! Human-readable `adjective-noun` snapshot names.

use ds_common::NameGenerator;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "amber", "ancient", "bold", "brave", "bright", "calm", "clever", "cosmic", "crimson", "curious",
    "daring", "dusty", "eager", "early", "fancy", "fierce", "frosty", "gentle", "golden", "hidden",
    "humble", "icy", "jolly", "keen", "lively", "lucky", "mellow", "misty", "nimble", "noble",
    "odd", "patient", "polished", "proud", "quiet", "rapid", "rustic", "shiny", "silent", "silver",
    "sleepy", "snowy", "solid", "steady", "stormy", "sunny", "swift", "tidy", "vivid", "witty",
];

const NOUNS: &[&str] = &[
    "anchor", "badger", "beacon", "breeze", "canyon", "cedar", "comet", "coral", "crane", "delta",
    "ember", "falcon", "fern", "fjord", "forest", "glacier", "harbor", "heron", "island", "jaguar",
    "lagoon", "lantern", "maple", "meadow", "meteor", "nebula", "orchid", "otter", "panda", "pebble",
    "pine", "prairie", "quartz", "raven", "reef", "river", "saffron", "sparrow", "summit", "thistle",
    "thunder", "tiger", "tundra", "valley", "violet", "walrus", "willow", "wolf", "yak", "zephyr",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNames;

impl NameGenerator for RandomNames {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
        let noun = NOUNS[rng.random_range(0..NOUNS.len())];
        format!("{adjective}-{noun}")
    }
}
