//! Heuristic quality score for a finished generation.
//!
//! Cheap static signals only: whether the build passed, how much repair it
//! took, and what the source looks like. Not a substitute for looking at the
//! rendered page.

use crate::deps::{Dependency, detect_imports};

/// Score `code` from 0 to 100.
pub fn score(code: &str, build_passed: bool, iterations: u32) -> u8 {
    let mut total: i32 = if build_passed { 55 } else { 15 };

    // Each repair iteration beyond the first costs a little.
    let repairs = iterations.saturating_sub(1) as i32;
    total -= (repairs * 2).min(20);

    let ui_components = detect_imports(code)
        .iter()
        .filter(|d| matches!(d, Dependency::UiComponent(_)))
        .count() as i32;
    total += (ui_components * 3).min(15);

    if ["sm:", "md:", "lg:", "xl:"].iter().any(|p| code.contains(p)) {
        total += 10;
    }
    if code.contains("flex") || code.contains("grid") {
        total += 5;
    }
    if code.contains("aria-") || code.contains("alt=") || code.contains("<Label") {
        total += 5;
    }
    if code.contains("useState") {
        total += 5;
    }
    if code.contains("export default") {
        total += 5;
    }

    total.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const RICH: &str = r#"import { useState } from "react";
import { Button } from "@/components/ui/button";
import { Card, CardContent } from "@/components/ui/card";
import { Input } from "@/components/ui/input";
import { Label } from "@/components/ui/label";
export default function App() {
  const [email, setEmail] = useState("");
  return (
    <div className="flex min-h-screen items-center justify-center p-4 md:p-8">
      <Card><CardContent>
        <Label htmlFor="email">Email</Label>
        <Input id="email" value={email} onChange={(e) => setEmail(e.target.value)} />
        <Button aria-label="Sign in">Sign in</Button>
      </CardContent></Card>
    </div>
  );
}"#;

    #[test]
    fn test_rich_passing_component_scores_high() {
        let s = score(RICH, true, 1);
        assert!(s >= 90, "score was {}", s);
        assert!(s <= 100);
    }

    #[test]
    fn test_failed_build_scores_low() {
        assert!(score("const x = ", false, 21) < 30);
    }

    #[test]
    fn test_repairs_lower_the_score() {
        assert!(score(RICH, true, 6) < score(RICH, true, 1));
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(score("", false, 500), 0);
    }
}
