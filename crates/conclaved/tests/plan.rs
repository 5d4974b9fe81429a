//! `conclaved plan` over the shop demo.

use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;

fn demo(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos/shop")
        .join(file)
}

fn plan(extra: &[&str]) -> Value {
    let output = Command::new(env!("CARGO_BIN_EXE_conclaved"))
        .arg("plan")
        .arg("--composition")
        .arg(demo("composition.toml"))
        .arg("--config")
        .arg(demo("conclave.toml"))
        .args(extra)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

fn isolate(plan: &Value, name: &str) -> Vec<String> {
    plan["distribution"]["new"]
        .as_array()
        .unwrap()
        .iter()
        .find(|i| i["name"] == name)
        .unwrap()["components"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn plans_the_shop() {
    let plan = plan(&[]);
    assert_eq!(plan["composition"], "shop");

    let new: Vec<&str> = plan["distribution"]["new"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["name"].as_str().unwrap())
        .collect();
    assert_eq!(new, vec!["shop-node-python-auto01", "storage"]);
    assert_eq!(
        isolate(&plan, "shop-node-python-auto01"),
        vec!["cart", "catalog", "recommender"]
    );
    assert_eq!(isolate(&plan, "storage"), vec!["inventory", "ledger"]);
    assert!(plan.get("audit").is_none());
}

#[test]
fn replayed_crash_keeps_cart_and_catalog_apart() {
    let events = demo("lost-cart.json");
    let plan = plan(&["--events", events.to_str().unwrap(), "--audit"]);

    assert_eq!(isolate(&plan, "shop-node-python-auto01"), vec!["cart", "recommender"]);
    assert_eq!(isolate(&plan, "shop-node-python-auto02"), vec!["catalog"]);
    assert_eq!(plan["audit"].as_array().unwrap().len(), 5);
}
