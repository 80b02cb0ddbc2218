#![allow(dead_code)]
use deriva::ast::Model;
use deriva::declaration;
use deriva::script::Script;
use serde_json::{Value as Json, json};

pub const WORKLOADS: [(&str, &str); 3] = [
    ("derived_chain", "tests/programs/derived_chain/script.yaml"),
    ("group_by", "tests/programs/group_by/script.yaml"),
    ("recursive_depths", "tests/programs/recursive_depths/script.yaml"),
];

pub fn load_model(path: &str) -> Model {
    let script = Script::load(path.as_ref()).unwrap_or_else(|err| panic!("load {path}: {err:#}"));
    script
        .model()
        .unwrap_or_else(|err| panic!("declaration {path}: {err:#}"))
}

pub const CATALOG: &str = r#"
- name: prices
  getter: [mapValues, [func, [mult, [get, [val], price], [get, [val], qty]]], [get, [root], products]]
- name: expensive
  getter: [filterBy, [func, [gt, [val], 500]], [get, [topLevel], prices]]
- name: count
  getter: [size, [get, [topLevel], expensive]]
- name: byCategory
  getter: [groupBy, [func, [get, [val], category]], [get, [root], products]]
- name: setQty
  setter: [products, [arg, 0], qty]
"#;

pub fn catalog_model() -> Model {
    declaration::parse_yaml(CATALOG).unwrap_or_else(|err| panic!("catalog declaration: {err}"))
}

pub fn catalog_data(products: usize) -> Json {
    let products: serde_json::Map<String, Json> = (0..products)
        .map(|index| {
            (
                format!("p{index}"),
                json!({
                    "price": index % 97,
                    "qty": index % 13,
                    "category": format!("c{}", index % 7),
                }),
            )
        })
        .collect();
    json!({ "products": products })
}
