//! Report fixtures for a small Java workspace with one class under test.

#![allow(dead_code)]

use std::path::Path;

pub const SOURCE: &str = "src/main/java/com/example/Complex.java";
pub const METHODS: [&str; 4] = ["abs()", "negate()", "plus(Complex)", "times(Complex)"];
pub const MUTANT_LINES: [u32; 3] = [21, 22, 23];

fn write(ws: &Path, rel: &str, body: &str) {
  let path = ws.join(rel);
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(path, body).unwrap();
}

fn source_line(n: u32) -> String {
  format!("    int v{n} = a < {n} ? 1 : 0;")
}

/// Write source, JaCoCo (csv + html), PIT and surefire reports. With
/// `covered` every line is hit and every mutant killed.
pub fn write_reports(ws: &Path, covered: bool) {
  let source: String = (1..=40).map(|n| source_line(n) + "\n").collect();
  write(ws, SOURCE, &source);

  let missed_lines = if covered { 0 } else { 10 };
  write(
    ws,
    "target/site/jacoco/jacoco.csv",
    &format!(
      "GROUP,PACKAGE,CLASS,INSTRUCTION_MISSED,INSTRUCTION_COVERED,BRANCH_MISSED,BRANCH_COVERED,LINE_MISSED,LINE_COVERED,COMPLEXITY_MISSED,COMPLEXITY_COVERED,METHOD_MISSED,METHOD_COVERED\n\
       demo,com.example,Complex,{m},{c},0,4,{m},{c},0,4,0,4\n",
      m = missed_lines,
      c = 20 - missed_lines
    ),
  );

  let rows: String = METHODS
    .iter()
    .enumerate()
    .map(|(i, name)| {
      let missed = if covered { 0 } else { i + 1 };
      format!(
        "<tr><td id=\"a{i}\"><a href=\"Complex.java.html#L{}\" class=\"el_method\">{name}</a></td>\
         <td class=\"ctr1\" id=\"h{i}\">{missed}</td><td class=\"ctr2\" id=\"i{i}\">5</td></tr>\n",
        10 + i * 5
      )
    })
    .collect();
  write(ws, "target/site/jacoco/com.example/Complex.html", &format!("<table><tbody>\n{rows}</tbody></table>"));

  let spans: String = (10..=14)
    .map(|n| {
      let class = if covered { "fc" } else { "nc" };
      format!("<span class=\"{class}\" id=\"L{n}\">{}</span>\n", source_line(n).replace('<', "&lt;"))
    })
    .collect();
  write(ws, "target/site/jacoco/com.example/Complex.java.html", &format!("<pre>\n{spans}</pre>"));

  let mutations: String = MUTANT_LINES
    .iter()
    .map(|line| {
      let (detected, status, killer) =
        if covered { ("true", "KILLED", "com.example.ComplexTest.abs") } else { ("false", "SURVIVED", "") };
      format!(
        "<mutation detected='{detected}' status='{status}' numberOfTestsRun='2'>\
         <sourceFile>Complex.java</sourceFile>\
         <mutatedClass>com.example.Complex</mutatedClass>\
         <mutatedMethod>abs</mutatedMethod>\
         <methodDescription>()D</methodDescription>\
         <lineNumber>{line}</lineNumber>\
         <mutator>org.pitest.mutationtest.engine.gregor.mutators.ConditionalsBoundaryMutator</mutator>\
         <killingTest>{killer}</killingTest>\
         <description>changed conditional boundary</description>\
         </mutation>\n"
      )
    })
    .collect();
  write(ws, "target/pit-reports/mutations.xml", &format!("<?xml version=\"1.0\"?>\n<mutations>\n{mutations}</mutations>"));

  write(
    ws,
    "target/surefire-reports/TEST-com.example.ComplexTest.xml",
    "<testsuite name=\"com.example.ComplexTest\" tests=\"4\" failures=\"0\" errors=\"0\" skipped=\"0\"></testsuite>",
  );
}

/// Change manifest entry for the class, authored by `author`.
pub fn changes_json(author: &str) -> serde_json::Value {
  serde_json::json!([{ "path": SOURCE, "authors": [{ "name": author }], "commits_ago": 0 }])
}
