use indexmap::{IndexMap, IndexSet};

use super::path::{Path, PathSegment, paths_overlap, setter_path};
use super::{Annotation, TaggedModel};
use crate::ast::Key;

/// Getters with at least one invalidating path overlapping `path`.
pub fn find_references_to_path_in_all_getters(path: &Path, model: &TaggedModel) -> IndexSet<String> {
    model
        .getter_paths()
        .filter(|(_, paths)| paths.keys().any(|candidate| paths_overlap(candidate, path)))
        .map(|(name, _)| name.clone())
        .collect()
}

pub fn invalidates(path: &Path, model: &TaggedModel) -> bool {
    model
        .getter_paths()
        .any(|(_, paths)| paths.keys().any(|candidate| paths_overlap(candidate, path)))
}

/// Where the value of a node lives in the derived graph: its getter's result
/// entry followed by the current key of every enclosing function.
pub fn path_of_expr(annotation: &Annotation) -> Path {
    let mut segments = vec![
        PathSegment::TopLevel,
        PathSegment::Fixed(Key::Name(annotation.root_name.clone())),
    ];
    segments.extend((1..=annotation.depth).map(PathSegment::IterKey));
    Path(segments)
}

/// Setter name → getters a write through it can reach.
pub fn reverse_index(model: &TaggedModel) -> IndexMap<String, IndexSet<String>> {
    model
        .setters
        .iter()
        .map(|(name, setter)| {
            let affected = find_references_to_path_in_all_getters(&setter_path(setter), model);
            (name.clone(), affected)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Model, SetterDecl};
    use crate::split::split_setters_getters;
    use crate::tagging::normalize_and_tag_all_getters;
    use crate::token::TokenKind;

    fn tagged(model: &Model) -> TaggedModel {
        let (getters, setters) = split_setters_getters(model).expect("split succeeds");
        normalize_and_tag_all_getters(&getters, &setters).expect("tagging succeeds")
    }

    fn shop() -> Model {
        Model::new()
            .getter(
                "total",
                Expr::node(TokenKind::Size, vec![Expr::model_path(&["items"])]),
            )
            .getter("title", Expr::model_path(&["meta", "title"]))
            .setter("setItem", SetterDecl::set(vec![Expr::str("items"), Expr::Arg(0)]))
            .setter("setTitle", SetterDecl::set(vec![Expr::str("meta"), Expr::str("title")]))
            .setter("setLog", SetterDecl::set(vec![Expr::str("log")]))
    }

    #[test]
    fn reverse_index_maps_setters_to_affected_getters() {
        let model = tagged(&shop());
        let index = reverse_index(&model);

        assert_eq!(
            index["setItem"].iter().collect::<Vec<_>>(),
            vec!["total"]
        );
        assert_eq!(
            index["setTitle"].iter().collect::<Vec<_>>(),
            vec!["title"]
        );
        assert!(index["setLog"].is_empty());
    }

    #[test]
    fn invalidates_only_for_referenced_paths() {
        let model = tagged(&shop());
        assert!(invalidates(&setter_path(&model.setters["setItem"]), &model));
        assert!(!invalidates(&setter_path(&model.setters["setLog"]), &model));
    }

    #[test]
    fn reverse_index_is_deterministic() {
        let first = reverse_index(&tagged(&shop()));
        let second = reverse_index(&tagged(&shop()));
        assert_eq!(first, second);
    }

    #[test]
    fn expression_paths_follow_depth() {
        let model = tagged(&Model::new().getter(
            "names",
            Expr::collection(
                TokenKind::MapValues,
                Expr::get(Expr::val(), Expr::str("name")),
                Expr::model_path(&["users"]),
            ),
        ));
        let callback = &model.getters["names"].functions[1];
        let path = path_of_expr(model.annotation(callback.id));
        assert_eq!(
            path,
            Path(vec![
                PathSegment::TopLevel,
                PathSegment::Fixed(Key::name("names")),
                PathSegment::IterKey(1),
            ])
        );
    }
}
