//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! Dedicated vNIC continuity across a move.
//!
//! A mapping is a comma-joined list of slash-joined tuples handed to the
//! migrate command as `-i "vnic_mappings=..."`. Slots outside the valid
//! virtual slot range disable remapping altogether.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use lpm_common::config::{LpmConfig, VNIC_SLOTS};
use lpm_logging::{lpm_debug, LogContext};

use crate::controller::ControllerSession;
use crate::error::{LpmError, Result};
use crate::model::ManagedSystem;

/// Virtual slots that can carry a dedicated vNIC.
pub const VALID_SLOTS: RangeInclusive<i64> = VNIC_SLOTS;

/// Attachment mode for dedicated adapters.
pub const DEDICATED: &str = "ded";

/// Resolved adapter identities on one side of the move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideAdapters {
    pub vios_names: Vec<String>,
    pub vios_ids: Vec<String>,
    pub adapter_ids: Vec<String>,
    pub ports: Vec<String>,
}

/// Everything needed to render the mapping in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnicPlan {
    pub slot: i64,
    pub bandwidth: String,
    pub source: SideAdapters,
    pub target: SideAdapters,
}

/// Leg a mapping is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingDirection {
    /// Source-side fields first: each tuple names the near-side (source)
    /// VIOS, its id, adapter and port, followed by the destination adapter
    /// and port.
    There,
    /// Every source and target role swapped.
    Back,
}

impl FromStr for MappingDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "there" | "forward" => Ok(MappingDirection::There),
            "back" | "return" => Ok(MappingDirection::Back),
            other => Err(format!("unknown mapping direction: {}", other)),
        }
    }
}

/// One adapter pair, in the positional order the controller expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterTuple {
    pub slot: String,
    pub mode: String,
    pub vios_name: String,
    pub vios_id: String,
    pub adapter_id: String,
    pub port: String,
    pub bandwidth: String,
    pub opposite_adapter_id: String,
    pub opposite_port: String,
}

impl AdapterTuple {
    pub fn fields(&self) -> [&str; 9] {
        [
            self.slot.as_str(),
            self.mode.as_str(),
            self.vios_name.as_str(),
            self.vios_id.as_str(),
            self.adapter_id.as_str(),
            self.port.as_str(),
            self.bandwidth.as_str(),
            self.opposite_adapter_id.as_str(),
            self.opposite_port.as_str(),
        ]
    }
}

impl fmt::Display for AdapterTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields().join("/"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterMapping {
    tuples: Vec<AdapterTuple>,
}

impl AdapterMapping {
    /// Mapping that leaves adapters untouched.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn tuples(&self) -> &[AdapterTuple] {
        &self.tuples
    }

    /// `vnic_mappings` value: tuples comma-joined.
    pub fn value(&self) -> String {
        self.tuples
            .iter()
            .map(AdapterTuple::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Migrate command argument, or an empty string when nothing is remapped.
    pub fn as_argument(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("-i \"vnic_mappings={}\"", self.value())
    }
}

/// Renders a [`VnicPlan`] into the mapping for one leg.
#[derive(Debug, Clone)]
pub struct AdapterMappingBuilder<'a> {
    plan: &'a VnicPlan,
}

impl<'a> AdapterMappingBuilder<'a> {
    pub fn new(plan: &'a VnicPlan) -> Self {
        Self { plan }
    }

    pub fn build(&self, direction: MappingDirection) -> Result<AdapterMapping> {
        let plan = self.plan;
        if !VALID_SLOTS.contains(&plan.slot) {
            lpm_debug!("slot {} outside {:?}, adapter remapping disabled", plan.slot, VALID_SLOTS);
            return Ok(AdapterMapping::empty());
        }
        let count = check_lengths(plan)?;
        let (near, far) = match direction {
            MappingDirection::There => (&plan.source, &plan.target),
            MappingDirection::Back => (&plan.target, &plan.source),
        };
        let slot = plan.slot.to_string();
        let tuples = (0..count)
            .map(|index| AdapterTuple {
                slot: slot.clone(),
                mode: DEDICATED.to_owned(),
                vios_name: near.vios_names[index].clone(),
                vios_id: near.vios_ids[index].clone(),
                adapter_id: near.adapter_ids[index].clone(),
                port: near.ports[index].clone(),
                bandwidth: plan.bandwidth.clone(),
                opposite_adapter_id: far.adapter_ids[index].clone(),
                opposite_port: far.ports[index].clone(),
            })
            .collect();
        Ok(AdapterMapping { tuples })
    }
}

fn check_lengths(plan: &VnicPlan) -> Result<usize> {
    let count = plan.source.adapter_ids.len();
    if count == 0 {
        return Err(LpmError::Configuration(
            "vnic slot declared without any adapters".to_owned(),
        ));
    }
    for (side, adapters) in [("source", &plan.source), ("target", &plan.target)] {
        let exact = [
            ("adapter ids", adapters.adapter_ids.len()),
            ("ports", adapters.ports.len()),
        ];
        for (what, len) in exact {
            if len != count {
                return Err(LpmError::Configuration(format!(
                    "{} side lists {} {} for {} adapters",
                    side, len, what, count
                )));
            }
        }
        if adapters.vios_names.len() < count || adapters.vios_ids.len() < count {
            return Err(LpmError::Configuration(format!(
                "{} side needs one VIOS per adapter ({} adapters, {} VIOS)",
                side,
                count,
                adapters.vios_names.len().min(adapters.vios_ids.len())
            )));
        }
    }
    Ok(count)
}

/// Resolve VIOS and SR-IOV adapter identifiers for the configured vNIC plan.
/// `None` when no slot is declared or the slot is outside [`VALID_SLOTS`];
/// nothing is queried on the controller in that case.
pub async fn resolve_plan(config: &LpmConfig, session: &ControllerSession) -> Result<Option<VnicPlan>> {
    let Some(vnic) = config.vnic_plan() else {
        return Ok(None);
    };
    let Some(slot) = vnic.slot_num else {
        return Ok(None);
    };
    let source_system = ManagedSystem::new(config.controller.managed_system.as_str());
    let target_system = ManagedSystem::new(config.controller.target_managed_system.as_str());
    let count = vnic.adapters.len();

    let source = resolve_side(
        session,
        &source_system,
        &config.vios.source,
        &vnic.adapters,
        &vnic.ports,
        count,
    )
    .await?;
    let target = resolve_side(
        session,
        &target_system,
        &config.vios.target,
        &vnic.target_adapters,
        &vnic.target_ports,
        count,
    )
    .await?;
    lpm_debug!(
        context = LogContext::new()
            .with_partition(&session.partition().name)
            .with_controller(session.address()),
        "resolved vnic plan for slot {} with {} adapters",
        slot,
        count
    );
    Ok(Some(VnicPlan {
        slot,
        bandwidth: vnic.bandwidth.clone(),
        source,
        target,
    }))
}

async fn resolve_side(
    session: &ControllerSession,
    system: &ManagedSystem,
    vios: &[String],
    locations: &[String],
    ports: &[String],
    count: usize,
) -> Result<SideAdapters> {
    let vios_names: Vec<String> = vios.iter().take(count).cloned().collect();
    let mut vios_ids = Vec::with_capacity(vios_names.len());
    for name in &vios_names {
        vios_ids.push(session.lpar_id(system, name).await?);
    }
    let mut adapter_ids = Vec::with_capacity(locations.len());
    for location in locations {
        adapter_ids.push(session.adapter_id(system, location).await?);
    }
    Ok(SideAdapters {
        vios_names,
        vios_ids,
        adapter_ids,
        ports: ports.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(prefix: &str, count: usize) -> SideAdapters {
        SideAdapters {
            vios_names: (0..count).map(|i| format!("{prefix}vios{i}")).collect(),
            vios_ids: (0..count).map(|i| format!("{}", i + 1)).collect(),
            adapter_ids: (0..count).map(|i| format!("{prefix}{}", i + 10)).collect(),
            ports: (0..count).map(|i| format!("{prefix}port{i}")).collect(),
        }
    }

    fn plan(slot: i64, count: usize) -> VnicPlan {
        VnicPlan {
            slot,
            bandwidth: "2".to_owned(),
            source: side("s", count),
            target: side("t", count),
        }
    }

    #[test]
    fn single_pair_renders_nine_fields() {
        let plan = VnicPlan {
            slot: 150,
            bandwidth: "2".to_owned(),
            source: SideAdapters {
                vios_names: vec!["vios1".into()],
                vios_ids: vec!["1".into()],
                adapter_ids: vec!["2".into()],
                ports: vec!["ent0".into()],
            },
            target: SideAdapters {
                vios_names: vec!["vios2".into()],
                vios_ids: vec!["3".into()],
                adapter_ids: vec!["4".into()],
                ports: vec!["ent1".into()],
            },
        };
        let mapping = AdapterMappingBuilder::new(&plan)
            .build(MappingDirection::There)
            .unwrap();
        let value = mapping.value();
        assert!(!value.contains(','));
        let fields: Vec<&str> = value.split('/').collect();
        assert_eq!(fields.len(), 9);
        assert_eq!(fields, vec!["150", "ded", "vios1", "1", "2", "ent0", "2", "4", "ent1"]);
        assert_eq!(fields[8], "ent1");
        assert_eq!(
            mapping.as_argument(),
            "-i \"vnic_mappings=150/ded/vios1/1/2/ent0/2/4/ent1\""
        );
    }

    #[test]
    fn out_of_range_slots_disable_remapping() {
        for slot in [i64::MIN, -1, 0, 1, 2, 3000, 4096, i64::MAX] {
            let mut broken = plan(slot, 2);
            broken.target.ports.clear();
            for direction in [MappingDirection::There, MappingDirection::Back] {
                let mapping = AdapterMappingBuilder::new(&broken).build(direction).unwrap();
                assert!(mapping.is_empty(), "slot {slot}");
                assert_eq!(mapping.as_argument(), "");
            }
        }
    }

    #[test]
    fn return_leg_transposes_every_role() {
        for slot in [3, 150, 2999] {
            let plan = plan(slot, 3);
            let builder = AdapterMappingBuilder::new(&plan);
            let there = builder.build(MappingDirection::There).unwrap();
            let back = builder.build(MappingDirection::Back).unwrap();
            assert_eq!(there.tuples().len(), 3);
            for (out, ret) in there.tuples().iter().zip(back.tuples()) {
                assert_eq!(out.slot, ret.slot);
                assert_eq!(out.bandwidth, ret.bandwidth);
                assert_eq!(out.adapter_id, ret.opposite_adapter_id);
                assert_eq!(out.port, ret.opposite_port);
                assert_eq!(out.opposite_adapter_id, ret.adapter_id);
                assert_eq!(out.opposite_port, ret.port);
                assert!(out.vios_name.starts_with('s'));
                assert!(ret.vios_name.starts_with('t'));
            }
        }
    }

    #[test]
    fn pairs_are_comma_joined() {
        let plan = plan(42, 2);
        let value = AdapterMappingBuilder::new(&plan)
            .build(MappingDirection::There)
            .unwrap()
            .value();
        assert_eq!(value.split(',').count(), 2);
        assert!(value.starts_with("42/ded/svios0/1/s10/sport0/2/t10/tport0,"));
    }

    #[test]
    fn mismatched_lists_are_configuration_errors() {
        let mut short_ports = plan(150, 2);
        short_ports.source.ports.pop();
        let err = AdapterMappingBuilder::new(&short_ports)
            .build(MappingDirection::There)
            .unwrap_err();
        assert!(matches!(err, LpmError::Configuration(_)));

        let mut missing_vios = plan(150, 2);
        missing_vios.target.vios_ids.truncate(1);
        assert!(AdapterMappingBuilder::new(&missing_vios)
            .build(MappingDirection::Back)
            .is_err());
    }

    #[test]
    fn direction_parses_leg_names() {
        assert_eq!("there".parse::<MappingDirection>(), Ok(MappingDirection::There));
        assert_eq!("Back".parse::<MappingDirection>(), Ok(MappingDirection::Back));
        assert!("sideways".parse::<MappingDirection>().is_err());
    }
}
