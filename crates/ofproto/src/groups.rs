//! Group mod encoding and the textual group specification.
//!
//! Producers describe groups as text, e.g.
//! `type=select,bucket=output:2,bucket=weight:10,output:3`. The reconciler
//! prepends `group_id=<id>,` and parses the whole string into a
//! [`GroupMod`] when the group is installed; a delete needs only
//! `group_id=<id>`.

use byteorder::{ByteOrder, NetworkEndian};

use crate::actions::ActionList;
use crate::error::{ProtoError, Result};
use crate::header::OfpType;
use crate::messages::OfpPacket;
use crate::wire::{need, pad, put_u16, put_u32};

/// All groups, for group-wide deletes.
pub const OFPG_ALL: u32 = 0xffff_fffc;

/// Wildcard group for flow mods.
pub const OFPG_ANY: u32 = 0xffff_ffff;

/// Group mod commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum GroupModCommand {
    Add = 0,
    Modify = 1,
    Delete = 2,
}

impl GroupModCommand {
    fn from_code(code: u16) -> Result<Self> {
        Ok(match code {
            0 => Self::Add,
            1 => Self::Modify,
            2 => Self::Delete,
            other => {
                return Err(ProtoError::malformed(
                    "group_mod",
                    format!("unknown command {}", other),
                ))
            }
        })
    }
}

/// Group types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum GroupType {
    #[default]
    All = 0,
    Select = 1,
    Indirect = 2,
    FastFailover = 3,
}

impl GroupType {
    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::All,
            1 => Self::Select,
            2 => Self::Indirect,
            3 => Self::FastFailover,
            other => {
                return Err(ProtoError::malformed(
                    "group_mod",
                    format!("unknown group type {}", other),
                ))
            }
        })
    }

    fn parse_name(name: &str) -> Option<Self> {
        Some(match name {
            "all" => Self::All,
            "select" => Self::Select,
            "indirect" => Self::Indirect,
            "ff" | "fast_failover" => Self::FastFailover,
            _ => return None,
        })
    }
}

/// One group bucket: a weight and an encoded action list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket weight, only meaningful for select groups.
    pub weight: u16,
    /// Raw encoded actions.
    pub actions: Vec<u8>,
}

/// OFPT_GROUP_MOD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMod {
    /// What to do.
    pub command: GroupModCommand,
    /// Group type; ignored by the switch for deletes.
    pub group_type: GroupType,
    /// The group's 32-bit id, or [`OFPG_ALL`].
    pub group_id: u32,
    /// Buckets, empty for deletes.
    pub buckets: Vec<Bucket>,
}

impl GroupMod {
    /// The delete of every group sent when resyncing.
    pub fn delete_all() -> Self {
        Self {
            command: GroupModCommand::Delete,
            group_type: GroupType::All,
            group_id: OFPG_ALL,
            buckets: Vec::new(),
        }
    }

    /// Parses a textual group spec into a mod with the given command.
    ///
    /// The spec must start with `group_id=<id>`; `type=` and `bucket=`
    /// segments follow for adds. Everything after a `bucket=` up to the
    /// next `bucket=` is that bucket's comma-separated action list.
    pub fn parse(command: GroupModCommand, spec: &str) -> Result<Self> {
        let mut segments = spec.split("bucket=");
        let head = segments
            .next()
            .ok_or_else(|| ProtoError::group_spec(spec, "empty spec"))?;

        let mut group_id = None;
        let mut group_type = None;
        for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ProtoError::group_spec(spec, format!("expected key=value, got '{}'", part)))?;
            match key {
                "group_id" => {
                    let id = value
                        .parse::<u32>()
                        .map_err(|_| ProtoError::group_spec(spec, format!("bad group_id '{}'", value)))?;
                    group_id = Some(id);
                }
                "type" => {
                    group_type = Some(GroupType::parse_name(value).ok_or_else(|| {
                        ProtoError::group_spec(spec, format!("unknown group type '{}'", value))
                    })?);
                }
                other => {
                    return Err(ProtoError::group_spec(
                        spec,
                        format!("unknown key '{}'", other),
                    ));
                }
            }
        }

        let group_id =
            group_id.ok_or_else(|| ProtoError::group_spec(spec, "missing group_id"))?;

        let mut buckets = Vec::new();
        for segment in segments {
            buckets.push(parse_bucket(spec, segment)?);
        }

        if command == GroupModCommand::Add && buckets.is_empty() && group_type != Some(GroupType::Indirect)
        {
            return Err(ProtoError::group_spec(spec, "add without buckets"));
        }

        Ok(Self {
            command,
            group_type: group_type.unwrap_or_default(),
            group_id,
            buckets,
        })
    }

    /// Parses a group mod body from the wire.
    pub fn parse_wire(buf: &[u8]) -> Result<Self> {
        need(buf, 8, "group_mod")?;
        let command = GroupModCommand::from_code(NetworkEndian::read_u16(&buf[0..2]))?;
        let group_type = GroupType::from_code(buf[2])?;
        let group_id = NetworkEndian::read_u32(&buf[4..8]);

        let mut buckets = Vec::new();
        let mut rest = &buf[8..];
        while !rest.is_empty() {
            need(rest, 16, "group bucket")?;
            let len = NetworkEndian::read_u16(&rest[0..2]) as usize;
            if len < 16 || len % 8 != 0 {
                return Err(ProtoError::BadLength {
                    what: "group bucket",
                    len,
                });
            }
            need(rest, len, "group bucket body")?;
            buckets.push(Bucket {
                weight: NetworkEndian::read_u16(&rest[2..4]),
                actions: rest[16..len].to_vec(),
            });
            rest = &rest[len..];
        }

        Ok(Self {
            command,
            group_type,
            group_id,
            buckets,
        })
    }
}

impl OfpPacket for GroupMod {
    fn msg_type(&self) -> OfpType {
        OfpType::GroupMod
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        put_u16(out, self.command as u16);
        out.push(self.group_type as u8);
        pad(out, 1);
        put_u32(out, self.group_id);
        for bucket in &self.buckets {
            put_u16(out, (16 + bucket.actions.len()) as u16);
            put_u16(out, bucket.weight);
            put_u32(out, crate::actions::OFPP_ANY); // watch_port
            put_u32(out, OFPG_ANY); // watch_group
            pad(out, 4);
            out.extend_from_slice(&bucket.actions);
        }
    }
}

fn parse_bucket(spec: &str, segment: &str) -> Result<Bucket> {
    let mut weight = 0u16;
    let mut actions = ActionList::new();
    let mut any_action = false;

    for token in segment
        .trim_end_matches(',')
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        if let Some(value) = token.strip_prefix("weight:") {
            weight = value
                .parse::<u16>()
                .map_err(|_| ProtoError::group_spec(spec, format!("bad weight '{}'", value)))?;
        } else if let Some(port) = token.strip_prefix("output:") {
            let port = port
                .parse::<u32>()
                .map_err(|_| ProtoError::group_spec(spec, format!("bad output port '{}'", port)))?;
            actions = actions.output(port);
            any_action = true;
        } else if let Some(id) = token.strip_prefix("group:") {
            let id = id
                .parse::<u32>()
                .map_err(|_| ProtoError::group_spec(spec, format!("bad group id '{}'", id)))?;
            actions = actions.group(id);
            any_action = true;
        } else if token == "drop" {
            any_action = true;
        } else {
            return Err(ProtoError::group_spec(
                spec,
                format!("unknown bucket action '{}'", token),
            ));
        }
    }

    if !any_action {
        return Err(ProtoError::group_spec(spec, "bucket without actions"));
    }

    Ok(Bucket {
        weight,
        actions: actions.build(),
    })
}
