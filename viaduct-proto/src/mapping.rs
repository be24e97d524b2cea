//! The cross-version schema mapping.
//!
//! Loaded once at service start and read-only afterwards: per version
//! the cmd↔name tables and the descriptor pool, plus a precomputed
//! cmd translation table for every ordered version pair and the base
//! version used when the proxy originates packets of its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::{DescriptorPool, MessageDescriptor};

// ─── Protocol ────────────────────────────────────────────────────────────────

/// An opaque protocol-version tag ("3.0", "3.4", …). Equality only.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Protocol(Arc<str>);

impl Protocol {
    /// Intern a version tag.
    pub fn new(tag: &str) -> Self {
        Self(Arc::from(tag))
    }

    /// The tag as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while assembling the mapping.
#[derive(Debug)]
pub enum MappingError {
    /// The configured base version has no schema entry.
    UnknownBaseVersion(Protocol),
    /// A version was supplied twice.
    DuplicateVersion(Protocol),
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBaseVersion(v) => write!(f, "base version {v} has no schema"),
            Self::DuplicateVersion(v) => write!(f, "duplicate schema for version {v}"),
        }
    }
}

impl std::error::Error for MappingError {}

// ─── Mapping ─────────────────────────────────────────────────────────────────

struct VersionTables {
    pool: Arc<DescriptorPool>,
    name_by_cmd: HashMap<u16, String>,
    cmd_by_name: HashMap<String, u16>,
    xlate: HashMap<Protocol, HashMap<u16, u16>>,
}

/// The process-wide schema registry.
pub struct Mapping {
    versions: HashMap<Protocol, VersionTables>,
    base: Protocol,
    base_cmds: HashMap<String, u16>,
}

impl Mapping {
    /// Assemble the registry from per-version schemas.
    ///
    /// `schemas` carries `(version, descriptor pool, name → cmd)`. The
    /// pairwise translation tables are precomputed over shared message
    /// names.
    pub fn new(
        base: Protocol,
        schemas: Vec<(Protocol, DescriptorPool, HashMap<String, u16>)>,
    ) -> Result<Self, MappingError> {
        let mut versions: HashMap<Protocol, VersionTables> = HashMap::new();
        for (version, pool, commands) in schemas {
            let name_by_cmd = commands.iter().map(|(n, &c)| (c, n.clone())).collect();
            let tables = VersionTables {
                pool: Arc::new(pool),
                name_by_cmd,
                cmd_by_name: commands,
                xlate: HashMap::new(),
            };
            if versions.insert(version.clone(), tables).is_some() {
                return Err(MappingError::DuplicateVersion(version));
            }
        }

        let tags: Vec<Protocol> = versions.keys().cloned().collect();
        let mut pairs = Vec::new();
        for from in &tags {
            for to in &tags {
                if from == to {
                    continue;
                }
                let mut table = HashMap::new();
                for (&cmd_a, name) in &versions[from].name_by_cmd {
                    if let Some(&cmd_b) = versions[to].cmd_by_name.get(name) {
                        table.insert(cmd_a, cmd_b);
                    }
                }
                pairs.push((from.clone(), to.clone(), table));
            }
        }
        for (from, to, table) in pairs {
            if let Some(tables) = versions.get_mut(&from) {
                tables.xlate.insert(to, table);
            }
        }

        let base_cmds = versions
            .get(&base)
            .ok_or_else(|| MappingError::UnknownBaseVersion(base.clone()))?
            .cmd_by_name
            .clone();

        Ok(Self { versions, base, base_cmds })
    }

    /// The version injected packets are authored against.
    pub fn base_version(&self) -> &Protocol {
        &self.base
    }

    /// Whether `version` has a schema.
    pub fn knows(&self, version: &Protocol) -> bool {
        self.versions.contains_key(version)
    }

    /// `cmd → name` in one version.
    pub fn command_name(&self, version: &Protocol, cmd: u16) -> Option<&str> {
        self.versions.get(version)?.name_by_cmd.get(&cmd).map(String::as_str)
    }

    /// `name → cmd` in one version.
    pub fn command_by_name(&self, version: &Protocol, name: &str) -> Option<u16> {
        self.versions.get(version)?.cmd_by_name.get(name).copied()
    }

    /// `name → cmd` in the base version.
    pub fn base_command(&self, name: &str) -> Option<u16> {
        self.base_cmds.get(name).copied()
    }

    /// Translate a cmd between two versions; `None` when unmapped.
    pub fn translate(&self, from: &Protocol, to: &Protocol, cmd: u16) -> Option<u16> {
        self.versions.get(from)?.xlate.get(to)?.get(&cmd).copied()
    }

    /// Descriptor for `name` in one version.
    pub fn descriptor(&self, version: &Protocol, name: &str) -> Option<Arc<MessageDescriptor>> {
        self.versions.get(version)?.pool.get(name)
    }

    /// The descriptor pool of one version.
    pub fn pool(&self, version: &Protocol) -> Option<&Arc<DescriptorPool>> {
        self.versions.get(version).map(|t| &t.pool)
    }
}

// ─── Batch argument tables ───────────────────────────────────────────────────

/// Inner message name for a combat batch entry, by argument type.
///
/// Entries whose argument type is absent here are dropped from the
/// rebuilt batch.
pub fn combat_argument_name(argument_type: u32) -> Option<&'static str> {
    Some(match argument_type {
        1 => "EvtBeingHitInfo",
        2 => "EvtAnimatorStateChangedInfo",
        3 => "EvtFaceToDirInfo",
        4 => "EvtSetAttackTargetInfo",
        5 => "EvtRushMoveInfo",
        6 => "EvtAnimatorParameterInfo",
        7 => "EntityMoveInfo",
        8 => "EvtSyncEntityPositionInfo",
        9 => "EvtCombatSteerMotionInfo",
        10 => "EvtForceSyncPosInfo",
        11 => "EvtCompensatePosDiffInfo",
        12 => "EvtMonsterDoBlink",
        13 => "EvtFightTimeNotify",
        14 => "EvtSyncTransform",
        _ => return None,
    })
}

/// Inner message name for an ability batch entry, by argument type.
pub fn ability_argument_name(argument_type: u32) -> Option<&'static str> {
    Some(match argument_type {
        1 => "AbilityMetaModifierChange",
        3 => "AbilityMetaSpecialFloatArgument",
        4 => "AbilityScalarValueEntry",
        5 => "AbilityString",
        6 => "AbilityMetaReInitOverrideMap",
        7 => "AbilityScalarValueEntry",
        8 => "AbilityString",
        10 => "AbilityMetaAddOrGetAbilityAndTrigger",
        11 => "AbilityMetaSetKilledState",
        12 => "AbilityMetaSetAbilityTrigger",
        13 => "AbilityMetaAddNewAbility",
        15 => "AbilityMetaSetModifierApplyEntityId",
        16 => "AbilityMetaModifierDurabilityChange",
        17 => "AbilityMetaElementReactionVisual",
        18 => "AbilityMetaSetPoseParameter",
        19 => "AbilityMetaUpdateBaseReactionDamage",
        20 => "AbilityMetaTriggerElementReaction",
        21 => "AbilityMetaLoseHp",
        50 => "AbilityActionTriggerAbility",
        51 => "AbilityActionSetCrashDamage",
        53 => "AbilityActionSummon",
        54 => "AbilityActionBlink",
        55 => "AbilityActionCreateGadget",
        56 => "AbilityActionApplyLevelModifier",
        57 => "AbilityActionGenerateElemBall",
        58 => "AbilityActionSetRandomOverrideMapValue",
        59 => "AbilityActionServerMonsterLog",
        60 => "AbilityActionCreateTile",
        61 => "AbilityActionDestroyTile",
        62 => "AbilityActionFireAfterImage",
        64 => "AbilityActionDeductStamina",
        65 => "AbilityActionHitEffect",
        66 => "AbilityActionSetBulletTrackTarget",
        100 => "AbilityMixinAvatarSteerByCamera",
        102 => "AbilityMixinWindZone",
        103 => "AbilityMixinCostStamina",
        105 => "AbilityMixinElementShield",
        106 => "AbilityMixinGlobalShield",
        107 => "AbilityMixinShieldBar",
        108 => "AbilityMixinWindSeedSpawner",
        109 => "AbilityMixinDoActionByElementReaction",
        110 => "AbilityMixinFieldEntityCountChange",
        111 => "AbilityMixinScenePropSync",
        112 => "AbilityMixinWidgetMpSupport",
        _ => return None,
    })
}
