//! The built-in function ID table the compiler resolves names against and
//! the VM dispatches `CallFn` on.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FnId {
    // Numeric
    Abs,
    Int,
    Sgn,
    Sqr,
    Sin,
    Cos,
    Tan,
    Atn,
    Log,
    Exp,
    Pi,
    Rad,
    Deg,
    Min,
    Max,
    Clamp,
    ModFn,

    // RNG / time
    Rnd,
    Rndi,
    Randomize,
    Timer,

    // String
    StrDollar,
    Val,
    Len,
    ChrDollar,
    Asc,
    LeftDollar,
    RightDollar,
    MidDollar,
    Spc,
    Tab,
    Instr,
    StringDollar,

    // I/O
    Input,
    Locate,

    // Graphics (delegated to the external GraphicsHost)
    Screen,
    Cls,
    Color,
    Pset,
    Line,
    Circle,
    Box,
    Paint,
    Flush,
    ColorHsv,
    SaveImage,
    Sleep,
    Point,
    GLocate,
    GPrint,
}

impl FnId {
    /// Functions that may be written bare, without a parenthesized
    /// argument list.
    pub fn allows_bare_call(self) -> bool {
        matches!(self, FnId::Rnd | FnId::Pi | FnId::Timer)
    }

    /// Functions that produce no value and leave nothing on the stack.
    pub fn is_void(self) -> bool {
        matches!(
            self,
            FnId::Randomize
                | FnId::Input
                | FnId::Locate
                | FnId::Screen
                | FnId::Cls
                | FnId::Color
                | FnId::Pset
                | FnId::Line
                | FnId::Circle
                | FnId::Box
                | FnId::Paint
                | FnId::Flush
                | FnId::ColorHsv
                | FnId::SaveImage
                | FnId::Sleep
                | FnId::GLocate
                | FnId::GPrint
        )
    }

    pub fn by_name(name: &str) -> Option<FnId> {
        use FnId::*;
        Some(match name {
            "ABS" => Abs,
            "INT" => Int,
            "SGN" => Sgn,
            "SQR" => Sqr,
            "SIN" => Sin,
            "COS" => Cos,
            "TAN" => Tan,
            "ATN" => Atn,
            "LOG" => Log,
            "EXP" => Exp,
            "PI" => Pi,
            "RAD" => Rad,
            "DEG" => Deg,
            "MIN" => Min,
            "MAX" => Max,
            "CLAMP" => Clamp,
            "MOD" => ModFn,

            "RND" => Rnd,
            "RNDI" => Rndi,
            "RANDOMIZE" => Randomize,
            "TIMER" => Timer,

            "STR$" => StrDollar,
            "VAL" => Val,
            "LEN" => Len,
            "CHR$" => ChrDollar,
            "ASC" => Asc,
            "LEFT$" => LeftDollar,
            "RIGHT$" => RightDollar,
            "MID$" => MidDollar,
            "SPC" => Spc,
            "TAB" => Tab,
            "INSTR" => Instr,
            "STRING$" => StringDollar,

            "INPUT" => Input,
            "LOCATE" => Locate,

            "SCREEN" => Screen,
            "CLS" => Cls,
            "COLOR" => Color,
            "PSET" => Pset,
            "LINE" => Line,
            "CIRCLE" => Circle,
            "BOX" => Box,
            "PAINT" => Paint,
            "FLUSH" => Flush,
            "COLORHSV" => ColorHsv,
            "SAVEIMAGE" => SaveImage,
            "SLEEP" => Sleep,
            "POINT" => Point,
            "GLOCATE" => GLocate,
            "GPRINT" => GPrint,

            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_call_set() {
        assert!(FnId::Rnd.allows_bare_call());
        assert!(FnId::Pi.allows_bare_call());
        assert!(FnId::Timer.allows_bare_call());
        assert!(!FnId::Sin.allows_bare_call());
    }

    #[test]
    fn test_by_name_roundtrip() {
        assert_eq!(FnId::by_name("SIN"), Some(FnId::Sin));
        assert_eq!(FnId::by_name("STR$"), Some(FnId::StrDollar));
        assert_eq!(FnId::by_name("NOSUCHFN"), None);
    }

    #[test]
    fn test_void_functions() {
        assert!(FnId::Input.is_void());
        assert!(FnId::Cls.is_void());
        assert!(!FnId::Sin.is_void());
    }
}
