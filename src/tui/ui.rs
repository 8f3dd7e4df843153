//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use super::app::{DebuggerApp, ROW_BYTES};

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: code and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_status(frame, left_chunks[1], app);

    // Right side: registers, memory and help
    let reg_rows = app.cpu.regs.len().div_ceil(2) as u16 + 4;
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(reg_rows),
            Constraint::Min(6),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_registers(frame, right_chunks[0], app);
    draw_memory(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

/// Draw disassembly view, labelling the first line of each function.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let ip = app.cpu.ip() as usize;
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(label, line)| {
            let is_current = line.addr == ip;
            let is_bp = u16::try_from(line.addr).map_or(false, |a| app.breakpoints.contains(&a));
            let prefix = if is_current { "▶ " } else { "  " };
            let bp = if is_bp { "●" } else { " " };
            let label = label.as_deref().map(|l| format!("{}:", l)).unwrap_or_default();
            let text = format!("{} {}{:04x}: {:<10} {}", bp, prefix, line.addr, label, line.text);

            let style = if is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if is_bp {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw registers two per row, then flags and CPU state.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let dump = app.cpu.regs.dump();
    let mut content: Vec<Line> = dump
        .chunks(2)
        .map(|pair| {
            let mut spans = Vec::new();
            for (name, value) in pair {
                let style = if *value != 0 {
                    Style::default().fg(Color::White)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                spans.push(Span::raw(format!("{:>3}: ", name)));
                spans.push(Span::styled(format!("{:04x}", value), style));
                spans.push(Span::raw(format!(" {:>6}    ", *value as i16)));
            }
            Line::from(spans)
        })
        .collect();

    let flags = app.cpu.flags();
    content.push(Line::from(vec![
        Span::raw("Flags: "),
        Span::styled("Z", flag_style(flags.zero)),
        Span::raw(" "),
        Span::styled("N", flag_style(flags.negative)),
        Span::raw(" "),
        Span::styled("O", flag_style(flags.overflow)),
        Span::raw("   Depth: "),
        Span::styled(format!("{}", app.cpu.call_depth()), Style::default().fg(Color::Cyan)),
    ]));
    content.push(Line::from(vec![
        Span::raw("Cycles: "),
        Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
        Span::raw("   State: "),
        Span::styled(format!("{:?}", app.cpu.state),
            if app.cpu.is_running() {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Red)
            }),
    ]));

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw memory view of the selected segment.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let segment = app.cpu.segment(app.segment);
    let visible_rows = (area.height as usize).saturating_sub(2);
    let start = app.mem_scroll;
    let end = (start + visible_rows).min(app.mem_rows());
    let sp_row = app.cpu.sp() as usize / ROW_BYTES;
    let is_stack = app.segment == crate::cpu::SegmentId::Stack;

    let items: Vec<ListItem> = (start..end)
        .map(|row| {
            let addr = row * ROW_BYTES;
            let text = format!("{:04x}: {}", addr, segment.format_chunk(addr, ROW_BYTES));
            let nonzero = segment
                .slice(addr, ROW_BYTES.min(segment.capacity() - addr))
                .map_or(false, |bytes| bytes.iter().any(|&b| b != 0));

            let style = if is_stack && row == sp_row {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if nonzero {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(format!(" Memory: {} ", app.segment.name()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  m: Segment  ↑↓: Scroll  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}

/// Lit or dimmed style for a flag.
fn flag_style(set: bool) -> Style {
    if set {
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}
