// cvar.rs -- named configuration variables
//
// Every tunable of the viewer is a cvar. Defaults are registered by the
// code that reads them; the command line overrides them with
// `+set <name> <value>`.

use std::collections::HashMap;

use crate::common::com_printf;
use crate::q_shared::{CVAR_LATCH, CVAR_NOSET};

/// A configuration variable.
#[derive(Clone, Debug)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub latched_string: Option<String>,
    pub flags: i32,
    pub modified: bool,
    pub value: f32,
}

impl Cvar {
    /// Parse the string as whitespace-separated floats, e.g. a position
    /// like `"-50 256 -50"`. Missing or unparsable components are 0.
    pub fn vector(&self) -> [f32; 3] {
        let mut out = [0.0; 3];
        for (slot, word) in out.iter_mut().zip(self.string.split_whitespace()) {
            *slot = word.parse().unwrap_or(0.0);
        }
        out
    }
}

#[derive(Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    /// name -> index in cvar_vars
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    /// Get the floating-point value of a cvar. Returns 0 if not found.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |var| var.value)
    }

    /// Get the string value of a cvar. Returns "" if not found.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |var| var.string.as_str())
    }

    /// Get or create a cvar. If it already exists (for instance because it
    /// was set on the command line first), the value is kept and the flags
    /// are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: i32) -> &Cvar {
        let idx = match self.cvar_index.get(name) {
            Some(&idx) => {
                self.cvar_vars[idx].flags |= flags;
                idx
            }
            None => {
                let idx = self.cvar_vars.len();
                self.cvar_vars.push(Cvar {
                    name: name.to_string(),
                    string: value.to_string(),
                    latched_string: None,
                    flags,
                    modified: true,
                    value: value.parse::<f32>().unwrap_or(0.0),
                });
                self.cvar_index.insert(name.to_string(), idx);
                idx
            }
        };
        &self.cvar_vars[idx]
    }

    /// Set a cvar value. Write protected cvars are left alone and latched
    /// ones keep the new value aside until `get_latched_vars`.
    pub fn set(&mut self, name: &str, value: &str) {
        let Some(idx) = self.cvar_index.get(name).copied() else {
            self.get(name, value, 0);
            return;
        };
        let var = &mut self.cvar_vars[idx];

        if var.flags & CVAR_NOSET != 0 {
            com_printf(&format!("{} is write protected.\n", name));
            return;
        }

        if var.flags & CVAR_LATCH != 0 {
            let current = var.latched_string.as_deref().unwrap_or(&var.string);
            if value != current {
                com_printf(&format!("{} will be changed for next map.\n", name));
                var.latched_string = Some(value.to_string());
            }
            return;
        }

        if value == var.string {
            return; // not changed
        }

        var.modified = true;
        var.string = value.to_string();
        var.value = value.parse::<f32>().unwrap_or(0.0);
    }

    /// Apply all latched variable changes. Called when a new map is built.
    pub fn get_latched_vars(&mut self) {
        for var in &mut self.cvar_vars {
            if let Some(latched) = var.latched_string.take() {
                var.value = latched.parse::<f32>().unwrap_or(0.0);
                var.string = latched;
                var.modified = true;
            }
        }
    }

    /// Process `+set <name> <value>` sequences from the command line.
    /// Returns the arguments that were not consumed.
    pub fn add_early_commands(&mut self, args: &[String]) -> Vec<String> {
        let mut rest = Vec::new();
        let mut i = 0;
        while i < args.len() {
            if args[i] == "+set" {
                match (args.get(i + 1), args.get(i + 2)) {
                    (Some(name), Some(value)) => {
                        self.set(name, value);
                        i += 3;
                        continue;
                    }
                    _ => com_printf("usage: +set <variable> <value>\n"),
                }
            } else {
                rest.push(args[i].clone());
            }
            i += 1;
        }
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cvar_get_and_find() {
        let mut ctx = CvarContext::new();
        ctx.get("r_lightmap_size", "512", 0);
        assert_eq!(ctx.variable_value("r_lightmap_size"), 512.0);
        assert_eq!(ctx.variable_string("r_lightmap_size"), "512");
        assert_eq!(ctx.variable_value("missing"), 0.0);
        assert_eq!(ctx.variable_string("missing"), "");
    }

    #[test]
    fn test_cvar_set() {
        let mut ctx = CvarContext::new();
        ctx.get("cl_speed", "200", 0);
        ctx.set("cl_speed", "320");
        assert_eq!(ctx.variable_value("cl_speed"), 320.0);
    }

    #[test]
    fn test_cvar_noset() {
        let mut ctx = CvarContext::new();
        ctx.get("version", "1", CVAR_NOSET);
        ctx.set("version", "2");
        assert_eq!(ctx.variable_value("version"), 1.0);

        // the command line can't override it either
        ctx.add_early_commands(&args(&["+set", "version", "3"]));
        assert_eq!(ctx.variable_string("version"), "1");
    }

    #[test]
    fn test_cvar_latch() {
        let mut ctx = CvarContext::new();
        ctx.get("r_lightmap_size", "512", CVAR_LATCH);
        ctx.set("r_lightmap_size", "256");
        assert_eq!(ctx.variable_value("r_lightmap_size"), 512.0);

        ctx.get_latched_vars();
        assert_eq!(ctx.variable_value("r_lightmap_size"), 256.0);
        assert!(ctx.find_var("r_lightmap_size").unwrap().latched_string.is_none());
    }

    #[test]
    fn test_command_line_before_registration() {
        let mut ctx = CvarContext::new();
        let rest = ctx.add_early_commands(&args(&["+set", "map", "maps/base1.bsp", "extra"]));
        assert_eq!(rest, args(&["extra"]));

        // registering afterwards keeps the command line value
        let var = ctx.get("map", "maps/demo1.bsp", 0);
        assert_eq!(var.string, "maps/base1.bsp");
    }

    #[test]
    fn test_command_line_incomplete_set() {
        let mut ctx = CvarContext::new();
        let rest = ctx.add_early_commands(&args(&["+set", "frames"]));
        assert!(ctx.find_var("frames").is_none());
        assert_eq!(rest, args(&["frames"]));
    }

    #[test]
    fn test_cvar_vector() {
        let mut ctx = CvarContext::new();
        let var = ctx.get("cl_startpos", "-50 256 -50", 0);
        assert_eq!(var.vector(), [-50.0, 256.0, -50.0]);

        let var = ctx.get("partial", "1 x", 0);
        assert_eq!(var.vector(), [1.0, 0.0, 0.0]);
    }
}
