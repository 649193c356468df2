//! `read` / `write` commands.

use anyhow::{bail, Context, Result};

use cairn_core::types::{NodeId, Variant};

use super::Options;

fn parse_node(text: &str) -> Result<NodeId> {
    text.parse::<NodeId>()
        .map_err(|status| anyhow::anyhow!("bad node id {text:?}: {status}"))
}

fn describe(variant: &Variant) -> String {
    match variant {
        Variant::Empty => "(empty)".into(),
        Variant::Boolean(v) => format!("Boolean {v}"),
        Variant::SByte(v) => format!("SByte {v}"),
        Variant::Byte(v) => format!("Byte {v}"),
        Variant::Int16(v) => format!("Int16 {v}"),
        Variant::UInt16(v) => format!("UInt16 {v}"),
        Variant::Int32(v) => format!("Int32 {v}"),
        Variant::UInt32(v) => format!("UInt32 {v}"),
        Variant::Int64(v) => format!("Int64 {v}"),
        Variant::UInt64(v) => format!("UInt64 {v}"),
        Variant::Float(v) => format!("Float {v}"),
        Variant::Double(v) => format!("Double {v}"),
        Variant::String(v) => format!("String {:?}", v.as_deref().unwrap_or("")),
        Variant::DateTime(v) => format!("DateTime {v}"),
        Variant::Guid(v) => format!("Guid {v}"),
        Variant::ByteString(v) => {
            format!("ByteString ({} bytes)", v.as_ref().map(Vec::len).unwrap_or(0))
        }
        Variant::StatusCode(v) => format!("StatusCode {v}"),
        Variant::NodeId(v) => format!("NodeId {v}"),
        Variant::QualifiedName(v) => format!("QualifiedName {:?}", v.name.as_deref().unwrap_or("")),
        Variant::LocalizedText(v) => format!("LocalizedText {:?}", v.text.as_deref().unwrap_or("")),
        Variant::ExtensionObject(v) => format!("ExtensionObject {}", v.type_id),
        Variant::Array { values, .. } => format!("Array[{}]", values.len()),
    }
}

pub async fn read(opts: &Options, node: &str) -> Result<()> {
    let node_id = parse_node(node)?;
    let client = super::connect(opts).await?;
    let value = client.read_value(node_id).await.context("read failed")?;
    if opts.json {
        println!(
            "{}",
            serde_json::json!({
                "node": node,
                "status": value.status.to_string(),
                "value": value.value.as_ref().map(describe),
            })
        );
    } else {
        println!("status: {}", value.status);
        if let Some(variant) = &value.value {
            println!("value:  {}", describe(variant));
        }
    }
    client.disconnect().await;
    Ok(())
}

fn parse_value(ty: &str, text: &str) -> Result<Variant> {
    Ok(match ty {
        "bool" => Variant::Boolean(text.parse().context("expected true/false")?),
        "int32" => Variant::Int32(text.parse().context("expected an Int32")?),
        "uint32" => Variant::UInt32(text.parse().context("expected a UInt32")?),
        "int64" => Variant::Int64(text.parse().context("expected an Int64")?),
        "double" => Variant::Double(text.parse().context("expected a Double")?),
        "string" => Variant::String(Some(text.to_string())),
        other => bail!("unknown value type {other:?}"),
    })
}

pub async fn write(opts: &Options, node: &str, ty: &str, text: &str) -> Result<()> {
    let node_id = parse_node(node)?;
    let value = parse_value(ty, text)?;
    let client = super::connect(opts).await?;
    let status = client
        .write_value(node_id, value)
        .await
        .context("write failed")?;
    if opts.json {
        println!("{}", serde_json::json!({ "node": node, "status": status.to_string() }));
    } else {
        println!("{status}");
    }
    client.disconnect().await;
    if status.is_bad() {
        std::process::exit(1);
    }
    Ok(())
}
