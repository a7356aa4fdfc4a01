use enum_display::EnumDisplay;

use crate::value::Symbol;

#[derive(Clone, Copy, Debug, EnumDisplay, PartialEq, Eq, Hash)]
pub enum SpecialForm {
    Def,
    Loop,
    Recur,
    If,
    Case,
    Let,
    LetFn,
    Do,
    Fn,
    Quote,
    TheVar,
    Import,
    Dot,
    Assign,
    Deftype,
    Reify,
    Try,
    Throw,
    MonitorEnter,
    MonitorExit,
    Catch,
    Finally,
    New,
    Amp,
}

impl SpecialForm {
    pub const ALL: [SpecialForm; 24] = [
        SpecialForm::Def,
        SpecialForm::Loop,
        SpecialForm::Recur,
        SpecialForm::If,
        SpecialForm::Case,
        SpecialForm::Let,
        SpecialForm::LetFn,
        SpecialForm::Do,
        SpecialForm::Fn,
        SpecialForm::Quote,
        SpecialForm::TheVar,
        SpecialForm::Import,
        SpecialForm::Dot,
        SpecialForm::Assign,
        SpecialForm::Deftype,
        SpecialForm::Reify,
        SpecialForm::Try,
        SpecialForm::Throw,
        SpecialForm::MonitorEnter,
        SpecialForm::MonitorExit,
        SpecialForm::Catch,
        SpecialForm::Finally,
        SpecialForm::New,
        SpecialForm::Amp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::Def => "def",
            SpecialForm::Loop => "loop*",
            SpecialForm::Recur => "recur",
            SpecialForm::If => "if",
            SpecialForm::Case => "case*",
            SpecialForm::Let => "let*",
            SpecialForm::LetFn => "letfn*",
            SpecialForm::Do => "do",
            SpecialForm::Fn => "fn*",
            SpecialForm::Quote => "quote",
            SpecialForm::TheVar => "var",
            SpecialForm::Import => "import*",
            SpecialForm::Dot => ".",
            SpecialForm::Assign => "set!",
            SpecialForm::Deftype => "deftype*",
            SpecialForm::Reify => "reify*",
            SpecialForm::Try => "try",
            SpecialForm::Throw => "throw",
            SpecialForm::MonitorEnter => "monitor-enter",
            SpecialForm::MonitorExit => "monitor-exit",
            SpecialForm::Catch => "catch",
            SpecialForm::Finally => "finally",
            SpecialForm::New => "new",
            SpecialForm::Amp => "&",
        }
    }

    pub fn from_symbol(sym: &Symbol) -> Option<SpecialForm> {
        if sym.ns.is_some() {
            return None;
        }
        SpecialForm::ALL.iter().copied().find(|s| s.name() == &*sym.name)
    }

    pub fn is_clause(self) -> bool {
        matches!(self, SpecialForm::Catch | SpecialForm::Finally | SpecialForm::Amp)
    }
}
