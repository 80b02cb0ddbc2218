use anyhow::{Context, Result};

use crate::ast::{Model, SetterKind};
use crate::backend::{Backend, Generator, PreparedBackend, prepare_with, tag_model};
use crate::error::CompileResult;
use crate::program::{Mode, SetterProc, SetterStep};
use crate::split::Setter;
use crate::tagging::TaggedModel;

/// Whole-model recomputation: every write rebuilds every getter.
pub struct Naive;

impl Naive {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Naive {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for Naive {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn prepare(&self, model: &Model) -> Result<Box<dyn PreparedBackend>> {
        let tagged = tag_model(model).context("Compiling model for the naive backend")?;
        prepare_with(&NaiveGenerator { model: &tagged })
    }
}

pub struct NaiveGenerator<'a> {
    pub model: &'a TaggedModel,
}

impl Generator for NaiveGenerator<'_> {
    fn mode(&self) -> Mode {
        Mode::Naive
    }

    fn model(&self) -> &TaggedModel {
        self.model
    }

    fn generate_setter(&self, setter: &Setter) -> CompileResult<SetterProc> {
        let write = match setter.kind {
            SetterKind::Set => SetterStep::Write,
            SetterKind::Splice => SetterStep::Splice,
        };
        Ok(SetterProc {
            name: setter.name.clone(),
            kind: setter.kind,
            params: setter.param_names(),
            path: setter.path.clone(),
            invalidates: false,
            steps: vec![write, SetterStep::RebuildAll],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, SetterDecl};
    use crate::program::Op;
    use crate::token::TokenKind;

    #[test]
    fn emits_plain_constructors_and_rebuilding_setters() {
        let model = Model::new()
            .getter(
                "summary",
                Expr::node(
                    TokenKind::Object,
                    vec![
                        Expr::str("count"),
                        Expr::node(TokenKind::Size, vec![Expr::model_path(&["items"])]),
                    ],
                ),
            )
            .setter("setItem", SetterDecl::set(vec![Expr::str("items"), Expr::Arg(0)]));
        let prepared = Naive::new().prepare(&model).expect("compiles");
        let program = prepared.program();

        let summary = program.getter("summary").expect("getter present");
        assert!(matches!(summary.function.body, Op::Object(_)));
        assert!(summary.function.tracking.lines.is_empty());

        let setter = &program.setters["setItem"];
        assert_eq!(setter.steps, vec![SetterStep::Write, SetterStep::RebuildAll]);
        assert!(!setter.triggers_invalidations());
    }
}
