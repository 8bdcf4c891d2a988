use symtree_core::config::IconStyle;

/// Icon glyph for an LSP `SymbolKind`, or `None` when icons are off.
///
/// Unknown kinds fall back to the generic "misc" glyph of the style.
pub fn icon_for(style: IconStyle, kind: u32) -> Option<&'static str> {
    match style {
        IconStyle::None => None,
        IconStyle::Codicon => Some(codicon(kind)),
        IconStyle::Nerd => Some(nerd(kind)),
    }
}

fn codicon(kind: u32) -> &'static str {
    match kind {
        1 => "\u{eb60}", // file
        2 | 3 | 4 => "\u{ea8b}", // module, namespace, package
        5 => "\u{eb5b}", // class
        6 | 9 | 12 => "\u{ea8c}", // method, constructor, function
        7 => "\u{eb65}", // property
        8 => "\u{eb5f}", // field
        10 => "\u{ea95}", // enum
        11 => "\u{eb61}", // interface
        13 => "\u{ea88}", // variable
        14 => "\u{eb5d}", // constant
        15 => "\u{eb8d}", // string
        16 => "\u{ea90}", // number
        17 => "\u{ea8f}", // boolean
        18 => "\u{ea8a}", // array
        19 => "\u{ea8b}", // object
        20 => "\u{ea93}", // key
        22 => "\u{eb5e}", // enum member
        23 => "\u{ea91}", // struct
        24 => "\u{ea86}", // event
        25 => "\u{eb64}", // operator
        26 => "\u{ea92}", // type parameter
        _ => "\u{eb63}",
    }
}

fn nerd(kind: u32) -> &'static str {
    match kind {
        1 => "\u{f0214}",
        2 | 3 | 4 => "\u{f0487}",
        5 => "\u{f0831}",
        6 | 9 => "\u{f01a7}",
        12 => "\u{f0295}",
        7 => "\u{f0ad}",
        8 => "\u{f0722}",
        10 => "\u{f15d}",
        11 => "\u{f0e8}",
        13 => "\u{f002b}",
        14 => "\u{f03ff}",
        15 => "\u{f0b7a}",
        16 => "\u{f03a0}",
        17 => "\u{f0895}",
        18 => "\u{f0a39}",
        19 => "\u{f0169}",
        20 => "\u{f0306}",
        22 => "\u{f15d}",
        23 => "\u{f0645}",
        24 => "\u{f0e7}",
        25 => "\u{f0085}",
        26 => "\u{f0284}",
        _ => "\u{f0453}",
    }
}
