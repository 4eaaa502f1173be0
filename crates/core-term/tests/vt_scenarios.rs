//! End-to-end scenarios: raw bytes in, observable grid state out.

use anyhow::Result;
use core_grid::{CellFlags, Color, StyleFlags};
use core_term::{Config, Terminal};
use core_vt::stream::Stream;
use core_vt::Mode;

fn terminal(cols: u16, rows: u16) -> Stream<Terminal<Vec<u8>>> {
    Stream::new(Terminal::new(Config::sized(cols, rows), Vec::new()))
}

#[test]
fn plain_print() -> Result<()> {
    let mut s = terminal(80, 24);
    s.next_slice(b"Hi")?;
    let t = &s.handler;
    assert_eq!(t.cell_at(0, 0).codepoint(), Some('H'));
    assert_eq!(t.cell_at(1, 0).codepoint(), Some('i'));
    assert_eq!(t.cursor_pos(), (2, 0));
    assert!(!t.pending_wrap());
    Ok(())
}

#[test]
fn cursor_forward_then_sgr() -> Result<()> {
    let mut s = terminal(80, 24);
    s.next_slice(b"\x1b[5C\x1b[1;31mX")?;
    let t = &s.handler;
    assert_eq!(t.cell_at(5, 0).codepoint(), Some('X'));
    let style = t.style_at(5, 0);
    assert!(style.has(StyleFlags::BOLD));
    assert_eq!(style.fg(), Color::Palette(1));
    assert_eq!(t.cursor_pos(), (6, 0));
    Ok(())
}

#[test]
fn mode_set_and_reset() -> Result<()> {
    let mut s = terminal(80, 24);
    s.next_slice(b"\x1b[?6h")?;
    assert!(s.handler.modes().get(Mode::Origin));
    s.next_slice(b"\x1b[?6l")?;
    assert!(!s.handler.modes().get(Mode::Origin));
    Ok(())
}

#[test]
fn style_interning_shares_one_id() -> Result<()> {
    let mut s = terminal(80, 24);
    s.next_slice(b"\x1b[1mAB")?;
    let t = &s.handler;
    let a = t.cell_at(0, 0);
    let b = t.cell_at(1, 0);
    assert_ne!(a.style_id, 0);
    assert_eq!(a.style_id, b.style_id);

    let pin = t.grid().active_pin(0, 0);
    let page = t.grid().page(pin.node);
    assert_eq!(page.style_ref_count(a.style_id), 2);
    page.verify_integrity().unwrap();
    Ok(())
}

#[test]
fn sgr_reset_returns_to_default_id() -> Result<()> {
    let mut s = terminal(80, 24);
    s.next_slice(b"\x1b[1mA\x1b[0mB")?;
    let t = &s.handler;
    assert_ne!(t.cell_at(0, 0).style_id, 0);
    assert_eq!(t.cell_at(1, 0).style_id, 0);
    Ok(())
}

#[test]
fn utf8_and_wide_glyphs() -> Result<()> {
    let mut s = terminal(20, 4);
    s.next_slice("a界b".as_bytes())?;
    let t = &s.handler;
    assert_eq!(t.cell_at(0, 0).codepoint(), Some('a'));
    assert_eq!(t.cell_at(1, 0).codepoint(), Some('界'));
    assert!(t.cell_at(1, 0).has_flag(CellFlags::WIDE));
    assert!(t.cell_at(2, 0).has_flag(CellFlags::WIDE_SPACER));
    assert_eq!(t.cell_at(3, 0).codepoint(), Some('b'));
    assert_eq!(t.cursor_pos(), (4, 0));
    Ok(())
}

#[test]
fn malformed_utf8_prints_replacement() -> Result<()> {
    let mut s = terminal(20, 4);
    s.next_slice(&[0xE4, 0xB8, b'x'])?;
    let t = &s.handler;
    assert_eq!(t.cell_at(0, 0).codepoint(), Some('\u{FFFD}'));
    assert_eq!(t.cell_at(1, 0).codepoint(), Some('x'));
    Ok(())
}

#[test]
fn title_and_pwd_and_hyperlink() -> Result<()> {
    let mut s = terminal(40, 4);
    s.next_slice(b"\x1b]2;my title\x07")?;
    s.next_slice(b"\x1b]7;file://host/tmp\x1b\\")?;
    s.next_slice(b"\x1b]8;;https://example.com\x1b\\link\x1b]8;;\x1b\\plain")?;
    let t = &s.handler;
    assert_eq!(t.title(), Some("my title"));
    assert_eq!(t.pwd(), Some("file://host/tmp"));

    let linked = t.cell_at(0, 0);
    assert_ne!(linked.hyperlink_id, 0);
    let pin = t.grid().active_pin(0, 0);
    let page = t.grid().page(pin.node);
    assert_eq!(
        page.hyperlink(linked.hyperlink_id).unwrap().uri,
        "https://example.com"
    );
    // All four "link" cells share the id; "plain" cells carry none.
    assert_eq!(t.cell_at(3, 0).hyperlink_id, linked.hyperlink_id);
    assert_eq!(t.cell_at(4, 0).hyperlink_id, 0);
    page.verify_integrity().unwrap();
    Ok(())
}

#[test]
fn device_attributes_and_dsr_replies() -> Result<()> {
    let mut s = terminal(80, 24);
    s.next_slice(b"\x1b[c\x1b[5n\x1b[3;4H\x1b[6n")?;
    let out = s.handler.writer_mut().clone();
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("\x1b[?62;22c"), "primary DA in {text:?}");
    assert!(text.contains("\x1b[0n"), "operating status in {text:?}");
    assert!(text.contains("\x1b[3;4R"), "CPR in {text:?}");
    Ok(())
}

#[test]
fn origin_mode_homes_to_region() -> Result<()> {
    let mut s = terminal(80, 24);
    s.next_slice(b"\x1b[5;10r\x1b[?6h")?;
    assert_eq!(s.handler.cursor_pos(), (0, 4));
    // CUP is region-relative under origin mode.
    s.next_slice(b"\x1b[2;3H")?;
    assert_eq!(s.handler.cursor_pos(), (2, 5));
    // CPR reports region-relative coordinates.
    s.next_slice(b"\x1b[6n")?;
    let out = s.handler.writer_mut().clone();
    assert!(String::from_utf8_lossy(&out).contains("\x1b[2;3R"));
    Ok(())
}

#[test]
fn rep_and_tab_movement() -> Result<()> {
    let mut s = terminal(40, 4);
    s.next_slice(b"q\x1b[3b")?;
    assert_eq!(s.handler.row_text(0), "qqqq");
    s.next_slice(b"\r\n\tx")?;
    assert_eq!(s.handler.cell_at(8, 1).codepoint(), Some('x'));
    Ok(())
}

#[test]
fn full_reset_restores_defaults() -> Result<()> {
    let mut s = terminal(40, 8);
    s.next_slice(b"\x1b[?6h\x1b[1mtext\x1b[5;6r\x1b]2;t\x07")?;
    s.next_slice(b"\x1bc")?;
    let t = &s.handler;
    assert!(!t.modes().get(Mode::Origin));
    assert_eq!(t.cursor_pos(), (0, 0));
    assert_eq!(t.row_text(0), "");
    // Modes with on-defaults come back on.
    assert!(t.modes().get(Mode::Wraparound));
    Ok(())
}

#[test]
fn kitty_keyboard_stack_and_query() -> Result<()> {
    let mut s = terminal(40, 4);
    s.next_slice(b"\x1b[>5u\x1b[?u")?;
    let out = s.handler.writer_mut().clone();
    assert!(String::from_utf8_lossy(&out).contains("\x1b[?5u"));
    s.next_slice(b"\x1b[<1u\x1b[?u")?;
    let out = s.handler.writer_mut().clone();
    assert!(String::from_utf8_lossy(&out).ends_with("\x1b[?0u"));
    Ok(())
}

#[test]
fn palette_set_query_reset() -> Result<()> {
    let mut s = terminal(40, 4);
    s.next_slice(b"\x1b]4;1;#102030\x07\x1b]4;1;?\x07")?;
    let out = s.handler.writer_mut().clone();
    assert!(String::from_utf8_lossy(&out).contains("\x1b]4;1;rgb:1010/2020/3030\x07"));
    s.next_slice(b"\x1b]104;1\x07")?;
    assert_eq!(s.handler.palette().get(1), core_grid::Rgb::new(205, 0, 0));
    Ok(())
}

#[test]
fn protected_cells_survive_selective_erase() -> Result<()> {
    let mut s = terminal(40, 4);
    // DECSCA-protect "ab", unprotect, write "cd", then DECSED complete.
    s.next_slice(b"\x1b[1\"qab\x1b[0\"qcd\x1b[?2J")?;
    let t = &s.handler;
    assert_eq!(t.row_text(0), "ab");
    Ok(())
}

#[test]
fn scrollback_accumulates_and_ed3_clears() -> Result<()> {
    let mut s = terminal(10, 3);
    for i in 0..10 {
        s.next_slice(format!("line{i}\r\n").as_bytes())?;
    }
    assert!(s.handler.grid().history_rows() > 0);
    s.next_slice(b"\x1b[3J")?;
    assert_eq!(s.handler.grid().history_rows(), 0);
    s.handler.grid().verify_integrity().unwrap();
    Ok(())
}

#[test]
fn dec_special_charset_draws_lines() -> Result<()> {
    let mut s = terminal(20, 4);
    s.next_slice(b"\x1b(0lqk\x1b(B x")?;
    let t = &s.handler;
    assert_eq!(t.cell_at(0, 0).codepoint(), Some('┌'));
    assert_eq!(t.cell_at(1, 0).codepoint(), Some('─'));
    assert_eq!(t.cell_at(2, 0).codepoint(), Some('┐'));
    assert_eq!(t.cell_at(4, 0).codepoint(), Some('x'));
    Ok(())
}

#[test]
fn decaln_fills_screen() -> Result<()> {
    let mut s = terminal(10, 3);
    s.next_slice(b"\x1b#8")?;
    for y in 0..3 {
        assert_eq!(s.handler.row_text(y), "EEEEEEEEEE");
    }
    assert_eq!(s.handler.cursor_pos(), (0, 0));
    Ok(())
}
