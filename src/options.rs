use std::env;

use crate::value::Keyword;

#[derive(Clone, Debug, Default)]
pub struct CompilerOptions {
    pub allow_unresolved: bool,
    pub disable_locals_clearing: bool,
    pub elide_meta: Vec<Keyword>,
    pub generate_asm: bool,
    pub warn_on_reflection: bool,
    pub max_reanalysis: Option<usize>,
}

impl CompilerOptions {
    pub fn new() -> CompilerOptions {
        CompilerOptions::default()
    }

    pub fn from_env() -> CompilerOptions {
        let flag = |name: &str| env::var(name).map(|v| v == "true" || v == "1").unwrap_or(false);
        let elide_meta = env::var("CLJC_ELIDE_META")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Keyword::intern(s.trim_start_matches(':')))
                    .collect()
            })
            .unwrap_or_default();
        CompilerOptions {
            allow_unresolved: flag("CLJC_ALLOW_UNRESOLVED"),
            disable_locals_clearing: flag("CLJC_DISABLE_LOCALS_CLEARING"),
            elide_meta,
            generate_asm: false,
            warn_on_reflection: flag("CLJC_WARN_ON_REFLECTION"),
            max_reanalysis: None,
        }
    }

    pub fn allow_unresolved(mut self, allow: bool) -> Self {
        self.allow_unresolved = allow;
        self
    }

    pub fn disable_locals_clearing(mut self, disable: bool) -> Self {
        self.disable_locals_clearing = disable;
        self
    }

    pub fn elide_meta(mut self, keys: Vec<Keyword>) -> Self {
        self.elide_meta = keys;
        self
    }

    pub fn generate_asm(mut self, generate: bool) -> Self {
        self.generate_asm = generate;
        self
    }

    pub fn warn_on_reflection(mut self, warn: bool) -> Self {
        self.warn_on_reflection = warn;
        self
    }

    pub fn max_reanalysis(mut self, max: usize) -> Self {
        self.max_reanalysis = Some(max);
        self
    }
}
