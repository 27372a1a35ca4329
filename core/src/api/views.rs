//! Server-rendered pages. Every user or model supplied string goes through
//! maud's escaping splice; `PreEscaped` is reserved for the static stylesheet.

use std::collections::{BTreeMap, BTreeSet};

use maud::{html, Markup, PreEscaped, DOCTYPE};
use time::UtcOffset;

use crate::agents::registry::find_model;
use crate::agents::{ModelAnswer, ModelSpec};
use crate::analytics::{
    format_timestamp, AdminSummary, FeedbackLogRow, ModelInsights, ModelLeaderboardRow,
    MonthlyUsage,
};
use crate::config::KnowledgeBase;
use crate::history::{ConversationRecord, UsageStats};
use crate::session::{ChatTurn, Session, Theme};

pub const APP_TITLE: &str = "Smart Court AI";

pub const SAMPLE_QUESTIONS: [&str; 3] = [
    "ขั้นตอนการยื่นฟ้องคดีปกครองทำอย่างไร?",
    "ศาลปกครองมีอำนาจพิจารณาคดีประเภทใดบ้าง?",
    "การขอทุเลาการบังคับตามคำสั่งทางปกครองคืออะไร?",
];

const STYLE: &str = r#"
:root { --bg:#f5f7fb; --fg:#1f2937; --card:#ffffff; --muted:#6b7280; --accent:#1e3a8a; --border:#e5e7eb; }
body.dark { --bg:#0f172a; --fg:#e5e7eb; --card:#1e293b; --muted:#94a3b8; --accent:#818cf8; --border:#334155; }
* { box-sizing:border-box; }
body { margin:0; font-family:"Sarabun","Noto Sans Thai",system-ui,sans-serif; background:var(--bg); color:var(--fg); }
a { color:var(--accent); }
.layout { display:flex; min-height:100vh; }
aside { width:300px; padding:20px; background:var(--card); border-right:1px solid var(--border); }
main { flex:1; padding:24px; max-width:1400px; }
header.court { text-align:center; padding:18px; border-radius:16px; background:linear-gradient(135deg,#1e3a8a,#3b82f6); color:#fff; margin-bottom:20px; }
.court-icon { font-size:3rem; }
.login { max-width:480px; margin:10vh auto; padding:32px; background:var(--card); border-radius:16px; border:1px solid var(--border); text-align:center; }
.notice { padding:10px 14px; border-radius:10px; background:#fef3c7; color:#92400e; margin-bottom:16px; }
.error { background:#fee2e2; color:#991b1b; }
.grid { display:grid; gap:16px; margin:12px 0 24px; }
.grid-1 { grid-template-columns:1fr; }
.grid-2, .grid-4 { grid-template-columns:1fr 1fr; }
.card { background:var(--card); border:1px solid var(--border); border-left:6px solid var(--accent); border-radius:16px; overflow:hidden; }
.card-head { display:flex; justify-content:space-between; align-items:center; padding:10px 14px; }
.badge { color:#fff; padding:3px 10px; border-radius:999px; font-size:.85rem; }
.card-body { padding:0 14px 12px; }
.kb { font-size:.85rem; color:var(--muted); border-bottom:1px dashed var(--border); padding-bottom:6px; margin-bottom:8px; }
.answer { white-space:pre-wrap; line-height:1.6; }
.answer.failed { color:#b91c1c; }
.card-foot { display:flex; justify-content:space-between; align-items:center; padding:8px 14px; font-size:.8rem; color:var(--muted); background:rgba(0,0,0,.03); }
.stars button { background:none; border:none; font-size:1.1rem; cursor:pointer; color:var(--muted); padding:0 1px; }
.stars button.on { color:#f59e0b; }
.copy { background:none; border:1px solid var(--border); border-radius:8px; cursor:pointer; color:var(--fg); }
.user-bubble { margin-left:auto; max-width:70%; background:var(--accent); color:#fff; padding:10px 16px; border-radius:18px 18px 4px 18px; white-space:pre-wrap; }
.row { display:flex; }
.suggestions { display:flex; gap:8px; flex-wrap:wrap; }
.suggestions button, .samples button { border:1px solid var(--border); background:var(--card); color:var(--fg); border-radius:12px; padding:8px 12px; cursor:pointer; }
.samples { display:grid; grid-template-columns:repeat(3,1fr); gap:12px; }
.welcome { text-align:center; padding:40px; }
textarea { width:100%; min-height:70px; border-radius:14px; padding:10px; border:1px solid var(--border); background:var(--card); color:var(--fg); }
table { border-collapse:collapse; width:100%; margin-bottom:20px; }
th, td { border-bottom:1px solid var(--border); padding:6px 8px; text-align:left; vertical-align:top; }
.kpis { display:grid; grid-template-columns:repeat(4,1fr); gap:12px; margin-bottom:20px; }
.kpi { background:var(--card); border:1px solid var(--border); border-radius:12px; padding:12px; }
.kpi b { display:block; font-size:1.4rem; }
.logs { font-family:monospace; font-size:.75rem; max-height:200px; overflow:auto; }
details { margin:10px 0; }
"#;

const COPY_SCRIPT: &str = "navigator.clipboard.writeText(this.dataset.copy).then(() => { this.textContent = '✅'; })";

/// Column layout for a result row: one, two, or a 2×2 grid for three or four.
pub fn grid_class(count: usize) -> &'static str {
    match count {
        0 | 1 => "grid-1",
        2 => "grid-2",
        _ => "grid-4",
    }
}

fn page(title: &str, theme: Theme, body: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="th" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) " · " (APP_TITLE) }
                style { (PreEscaped(STYLE)) }
            }
            body class=(theme.as_str()) { (body) }
        }
    }
}

fn notice_banner(notice: Option<&str>) -> Markup {
    html! {
        @if let Some(text) = notice {
            div.notice { (text) }
        }
    }
}

pub fn login_page(notice: Option<&str>, error: Option<&str>) -> Markup {
    page(
        "เข้าสู่ระบบ",
        Theme::Light,
        html! {
            div.login {
                div.court-icon { "⚖️" }
                h1 { (APP_TITLE) }
                p { "ระบบผู้ช่วยอัจฉริยะศาลปกครอง" }
                (notice_banner(notice))
                @if let Some(err) = error {
                    div.notice.error { (err) }
                }
                form method="post" action="/login" {
                    p { label for="username" { "กรุณาระบุชื่อผู้ใช้งาน (User Identification)" } }
                    input #username type="text" name="username" placeholder="เช่น Officer A, สมชาย, ..." autofocus;
                    p { button type="submit" { "🚀 เข้าสู่ระบบ (Start)" } }
                }
            }
        },
    )
}

pub struct ChatView<'a> {
    pub session: &'a Session,
    pub models: &'a [&'static ModelSpec],
    pub knowledge_bases: &'a [KnowledgeBase],
    pub active_kb: Option<&'a KnowledgeBase>,
    pub notice: Option<&'a str>,
}

pub fn chat_page(view: &ChatView<'_>) -> Markup {
    let session = view.session;
    page(
        "สนทนา",
        session.theme,
        html! {
            div.layout {
                (sidebar(view))
                main {
                    header.court {
                        div.court-icon { "⚖️" }
                        h2 { (APP_TITLE) " Assistant" }
                        p { "ผู้ช่วยอัจฉริยะศาลปกครอง ตอบทุกข้อสงสัยด้วย AI" }
                    }
                    (notice_banner(view.notice))
                    nav {
                        b { "💬 สนทนา " (session.selected_models.len()) " โมเดล" }
                        " · "
                        a href="/history" { "📜 ประวัติ (History)" }
                        " · "
                        a href="/admin" { "📊 Dashboard" }
                    }
                    @if session.transcript.is_empty() {
                        (welcome())
                    }
                    @for turn in &session.transcript {
                        (chat_turn(turn, session))
                    }
                    form method="post" action="/ask" {
                        textarea name="prompt" placeholder="พิมพ์คำถามของคุณที่นี่..." required {}
                        button type="submit" { "ส่งคำถาม" }
                    }
                }
            }
        },
    )
}

fn sidebar(view: &ChatView<'_>) -> Markup {
    let session = view.session;
    html! {
        aside {
            h3 { "⚖️ " (APP_TITLE) }
            p { "👤 " (session.username) }
            form method="post" action="/settings" {
                details open {
                    summary { "⚙️ ตั้งค่า (Settings)" }
                    p {
                        label { input type="radio" name="theme" value="light" checked[session.theme == Theme::Light]; " ☀️ Official Light" }
                        br;
                        label { input type="radio" name="theme" value="dark" checked[session.theme == Theme::Dark]; " 🌙 Modern Dark" }
                    }
                    p {
                        label for="temperature" { "ความสร้างสรรค์ (Temperature): " (format!("{:.1}", session.temperature)) }
                        input #temperature type="range" name="temperature" min="0" max="1" step="0.1" value=(format!("{:.1}", session.temperature));
                    }
                }
                h4 { "📚 คลังข้อมูล (Knowledge Base)" }
                select name="knowledge_base" {
                    @for kb in view.knowledge_bases {
                        option value=(kb.name) selected[view.active_kb.is_some_and(|a| a.name == kb.name)] { (kb.name) }
                    }
                }
                h4 { "🤖 เลือกโมเดล (Select Models)" }
                @for spec in view.models {
                    label title=(spec.description) {
                        input type="checkbox" name="models" value=(spec.name)
                            checked[session.selected_models.iter().any(|m| m == spec.name)];
                        " " (spec.badge) " " (spec.name)
                    }
                    br;
                }
                p { button type="submit" { "บันทึกการตั้งค่า" } }
            }
            form method="post" action="/reset" { button type="submit" { "🗑️ Reset" } }
            @if !session.transcript.is_empty() {
                p { a href="/export/chat.txt" { "📥 Save chat" } }
            }
            p { a href="/export/history.csv" { "📄 Export history (CSV)" } }
            details {
                summary { "🛠️ System Logs" }
                div.logs {
                    @if session.system_logs.is_empty() {
                        p { "No logs yet." }
                    }
                    @for line in session.system_logs.iter().rev() {
                        div { (line) }
                    }
                }
            }
            form method="post" action="/logout" { button type="submit" { "ออกจากระบบ" } }
        }
    }
}

fn welcome() -> Markup {
    html! {
        div.welcome {
            div style="font-size:4rem" { "💬" }
            h3 { "ยินดีต้อนรับสู่ " (APP_TITLE) }
            p { "เริ่มต้นใช้งานโดยเลือกคำถามตัวอย่าง หรือพิมพ์คำถามของคุณที่ด้านล่าง" }
        }
        form.samples method="post" action="/ask" {
            @for question in SAMPLE_QUESTIONS {
                button type="submit" name="prompt" value=(question) { (question) }
            }
        }
    }
}

fn chat_turn(turn: &ChatTurn, session: &Session) -> Markup {
    html! {
        div.row { div.user-bubble { (turn.prompt) } }
        div class={ "grid " (grid_class(turn.answers.len())) } {
            @for answer in &turn.answers {
                (result_card(answer, &turn.knowledge_base, &session.ratings))
            }
        }
        @if !turn.suggestions.is_empty() {
            p { small { "💡 คำถามที่เกี่ยวข้อง (Suggested Questions):" } }
            form.suggestions method="post" action="/ask" {
                @for question in &turn.suggestions {
                    button type="submit" name="prompt" value=(question) { (question) }
                }
            }
        }
        hr;
    }
}

pub fn result_card(answer: &ModelAnswer, kb_name: &str, ratings: &BTreeMap<i64, i64>) -> Markup {
    let spec = find_model(&answer.model);
    let color = spec.map(|s| s.color).unwrap_or("#64748b");
    let badge = spec.map(|s| s.badge).unwrap_or("🤖");
    let rating = answer
        .response_id
        .and_then(|id| ratings.get(&id).copied())
        .unwrap_or(0);
    let answer_class = if answer.is_error() { "answer failed" } else { "answer" };
    html! {
        div.card style={ "border-left-color:" (color) } {
            div.card-head {
                span {
                    (badge) " "
                    span.badge style={ "background:" (color) } { (answer.model) }
                }
                span {
                    "⏱ " (format!("{:.2}s", answer.elapsed_secs)) " "
                    button.copy type="button" title="คัดลอกคำตอบ" data-copy=(answer.answer)
                        onclick=(COPY_SCRIPT) { "📋" }
                }
            }
            div.card-body {
                div.kb { "📁 " (kb_name) }
                div class=(answer_class) { (answer.answer) }
                @if !answer.citations.is_empty() {
                    details {
                        summary { "📚 เอกสารอ้างอิง (" (answer.citations.len()) ")" }
                        @for citation in &answer.citations {
                            p { b { (citation.source) } br; small { (citation.excerpt) } }
                        }
                    }
                }
            }
            div.card-foot {
                @if let Some(id) = answer.response_id {
                    form.stars method="post" action="/feedback" {
                        input type="hidden" name="response_id" value=(id);
                        @for score in 1..=5 {
                            button type="submit" name="score" value=(score)
                                class=[(score <= rating).then_some("on")]
                                title={ (score) " ดาว" } { "★" }
                        }
                    }
                } @else {
                    span {}
                }
                span { "💰 Cost: " (format!("{:.4}", answer.cost_thb)) " THB" }
            }
        }
    }
}

pub fn history_page(
    session: &Session,
    records: &[ConversationRecord],
    stats: &UsageStats,
    query: Option<&str>,
    offset: UtcOffset,
) -> Markup {
    page(
        "ประวัติ",
        session.theme,
        html! {
            main {
                p { a href="/" { "← กลับไปหน้าสนทนา" } }
                h2 { "📜 ประวัติการใช้งาน: " (session.username) }
                div.kpis {
                    div.kpi { "ประวัติการสนทนา" b { (stats.total_conversations) " ครั้ง" } }
                    div.kpi { "ค่าใช้จ่ายรวม" b { (format!("{:.2}", stats.total_cost)) " THB" } }
                }
                form method="get" action="/history" {
                    input type="search" name="q" value=[query] placeholder="🔍 ค้นหาประวัติ";
                    button type="submit" { "ค้นหา" }
                }
                @if records.is_empty() {
                    p { "ยังไม่มีประวัติการใช้งาน" }
                }
                @for record in records {
                    details {
                        summary {
                            "🕒 " (format_timestamp(record.created_at, offset)) " | ❓ "
                            (record.question.chars().take(50).collect::<String>())
                        }
                        p { b { "Question: " } (record.question) }
                        @if let Some(kb) = &record.knowledge_base {
                            p { small { "Knowledge Base: " (kb) } }
                        }
                        div class={ "grid " (grid_class(record.responses.len())) } {
                            @for response in &record.responses {
                                div.card {
                                    div.card-head { b { (response.model_name) } }
                                    div.card-body { div.answer { (response.answer) } }
                                    div.card-foot {
                                        span {
                                            @if let Some(score) = response.score { (score) " ★" }
                                        }
                                        span { "Cost: " (format!("{:.4}", response.cost)) " THB" }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        },
    )
}

pub struct AdminView<'a> {
    pub summary: &'a AdminSummary,
    pub leaderboard: &'a [ModelLeaderboardRow],
    pub monthly: &'a [MonthlyUsage],
    pub feedback: &'a [FeedbackLogRow],
    pub roles: &'a BTreeMap<String, usize>,
    pub agencies: &'a BTreeMap<String, usize>,
    pub role_preferences: &'a BTreeMap<String, BTreeMap<String, f64>>,
    pub insights: &'a ModelInsights,
    pub utc_offset: UtcOffset,
}

pub fn admin_page(theme: Theme, view: &AdminView<'_>) -> Markup {
    page(
        "Dashboard",
        theme,
        html! {
            main {
                p { a href="/" { "← กลับไปหน้าสนทนา" } }
                h2 { "📊 " (APP_TITLE) " - Executive Dashboard" }
                @if view.leaderboard.is_empty() {
                    p { "⚠️ ยังไม่มีข้อมูลเพียงพอสำหรับการแสดงผล (No Data Available)" }
                } @else {
                    div.kpis {
                        div.kpi { "💬 Total Responses" b { (view.summary.total_responses) } }
                        div.kpi { "👥 Active Users" b { (view.summary.active_users) } }
                        div.kpi { "⭐ Feedbacks" b { (view.summary.total_feedback) } }
                        div.kpi { "💰 Total Cost" b { (format!("{:.2}", view.summary.total_cost)) " ฿" } }
                    }
                    h3 { "🏆 Model Leaderboard" }
                    table {
                        tr { th { "Model" } th { "Rating" } th { "Ratings" } th { "Responses" } th { "Avg time" } th { "Avg cost" } th { "Avg length" } }
                        @for row in view.leaderboard {
                            tr {
                                td { (row.model_name) }
                                td { (format!("{:.2} ⭐", row.avg_score)) }
                                td { (row.feedback_count) }
                                td { (row.total_responses) }
                                td { (format!("{:.2} s", row.avg_time_secs)) }
                                td { (format!("{:.4} ฿", row.avg_cost)) }
                                td { (format!("{:.0}", row.avg_chars)) }
                            }
                        }
                    }
                    h3 { "📅 Monthly usage" }
                    table {
                        tr { th { "Month" } th { "Conversations" } th { "Cost" } }
                        @for month in view.monthly {
                            tr { td { (month.month) } td { (month.conversations) } td { (format!("{:.2} ฿", month.cost)) } }
                        }
                    }
                    h3 { "👥 User Demographics" }
                    div.grid.grid-2 {
                        (count_table("Role", view.roles))
                        (count_table("Agency", view.agencies))
                    }
                    h3 { "🎭 Model preference by role" }
                    (role_preference_table(view.role_preferences))
                    (insight_summary(view.insights))
                    h3 { "📋 Feedback log" }
                    p { a href="/admin/report.csv" { "📥 Download CSV" } }
                    table {
                        tr { th { "Time" } th { "User" } th { "Question" } th { "Model" } th { "Score" } }
                        @for row in view.feedback {
                            tr {
                                td { (format_timestamp(row.created_at, view.utc_offset)) }
                                td { (row.username) }
                                td { (row.question) }
                                td { (row.model_name) }
                                td { (row.score) }
                            }
                        }
                    }
                }
            }
        },
    )
}

fn role_preference_table(prefs: &BTreeMap<String, BTreeMap<String, f64>>) -> Markup {
    let models: BTreeSet<&str> = prefs
        .values()
        .flat_map(|by_model| by_model.keys().map(String::as_str))
        .collect();
    html! {
        @if prefs.is_empty() {
            p { "No ratings yet." }
        } @else {
            table {
                tr {
                    th { "Role" }
                    @for model in &models { th { (model) } }
                }
                @for (role, by_model) in prefs {
                    tr {
                        td { (role) }
                        @for model in &models {
                            td {
                                @if let Some(score) = by_model.get(*model) { (format!("{score:.2}")) }
                            }
                        }
                    }
                }
            }
            p { small { "Mean satisfaction score per user group." } }
        }
    }
}

fn insight_summary(insights: &ModelInsights) -> Markup {
    html! {
        @if insights.best_rated.is_some() || insights.fastest.is_some() {
            div.notice.insights {
                b { "🤖 Analysis summary" }
                ul {
                    @if let Some(best) = &insights.best_rated {
                        li { "Highest satisfaction: " b { (best.model_name) } (format!(" (score {:.2})", best.value)) }
                    }
                    @if let Some(fastest) = &insights.fastest {
                        li { "Fastest: " b { (fastest.model_name) } (format!(" ({:.2}s)", fastest.value)) }
                    }
                    @if let (Some(best), Some(fastest)) = (&insights.best_rated, &insights.fastest) {
                        li {
                            "Recommendation: use " b { (best.model_name) } " when accuracy matters; "
                            "consider " b { (fastest.model_name) } " when speed matters."
                        }
                    }
                }
            }
        }
    }
}

fn count_table(label: &str, counts: &BTreeMap<String, usize>) -> Markup {
    html! {
        table {
            tr { th { (label) } th { "Users" } }
            @for (key, count) in counts {
                tr { td { (key) } td { (count) } }
            }
        }
    }
}
