//! Built-in project templates for quick-start generation.

/// A predefined project template. `prompt_template` carries
/// `{project_name}` and `{features}` placeholders.
#[derive(Debug, Clone)]
pub struct ProjectTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub prompt_template: &'static str,
    pub default_features: &'static [&'static str],
    pub suggested_features: &'static [&'static str],
}

pub static TEMPLATES: &[ProjectTemplate] = &[
    ProjectTemplate {
        id: "react_app",
        name: "React App",
        description: "Modern React application with TypeScript and Tailwind CSS",
        category: "frontend",
        prompt_template: "Create a modern React application with the following specifications:\n\
            \n\
            Project Name: {project_name}\n\
            \n\
            Requirements:\n\
            - Use React 18+ with TypeScript\n\
            - Use Tailwind CSS for styling\n\
            - Include responsive design\n\
            - Create a clean, modern UI\n\
            - Include proper component structure\n\
            \n\
            Features to implement:\n\
            {features}\n\
            \n\
            Additional requirements:\n\
            - Use functional components with hooks\n\
            - Include proper error handling\n\
            - Add loading states where appropriate\n\
            - Use semantic HTML\n",
        default_features: &[
            "Home page with hero section",
            "Navigation bar with responsive mobile menu",
            "Footer with links",
        ],
        suggested_features: &[
            "Dark mode toggle",
            "Contact form",
            "Image gallery",
            "Blog section",
            "About page",
        ],
    },
    ProjectTemplate {
        id: "api_service",
        name: "REST API Service",
        description: "FastAPI backend with SQLite database",
        category: "backend",
        prompt_template: "Create a REST API service with the following specifications:\n\
            \n\
            Project Name: {project_name}\n\
            \n\
            Requirements:\n\
            - Use Python with FastAPI framework\n\
            - Use SQLite with SQLAlchemy for database\n\
            - Include Pydantic for data validation\n\
            - Add proper error handling\n\
            - Include CORS middleware\n\
            \n\
            API endpoints to implement:\n\
            {features}\n\
            \n\
            Additional requirements:\n\
            - Follow RESTful API conventions\n\
            - Include proper HTTP status codes\n\
            - Add API documentation with Swagger\n\
            - Include input validation\n",
        default_features: &[
            "CRUD operations for main resource",
            "Health check endpoint",
            "List with pagination",
        ],
        suggested_features: &[
            "User authentication",
            "JWT token support",
            "Rate limiting",
            "Logging middleware",
            "Database migrations",
        ],
    },
    ProjectTemplate {
        id: "game",
        name: "Web Game",
        description: "Interactive browser-based game",
        category: "game",
        prompt_template: "Create an interactive web game with the following specifications:\n\
            \n\
            Project Name: {project_name}\n\
            \n\
            Requirements:\n\
            - Use vanilla JavaScript or TypeScript\n\
            - Use HTML5 Canvas or DOM-based rendering\n\
            - Include responsive design that works on desktop and mobile\n\
            - Add smooth animations\n\
            - Include sound effects (optional)\n\
            \n\
            Game features to implement:\n\
            {features}\n\
            \n\
            Additional requirements:\n\
            - Include a start screen\n\
            - Add score tracking\n\
            - Include game over screen with restart option\n\
            - Save high scores to local storage\n",
        default_features: &[
            "Core game mechanics",
            "Score display",
            "Game over handling",
        ],
        suggested_features: &[
            "Multiple difficulty levels",
            "Leaderboard",
            "Sound toggle",
            "Pause functionality",
            "Tutorial/instructions",
        ],
    },
    ProjectTemplate {
        id: "landing_page",
        name: "Landing Page",
        description: "Marketing landing page with modern design",
        category: "frontend",
        prompt_template: "Create a marketing landing page with the following specifications:\n\
            \n\
            Project Name: {project_name}\n\
            \n\
            Requirements:\n\
            - Modern, eye-catching design\n\
            - Fully responsive (mobile-first)\n\
            - Smooth scroll animations\n\
            - Fast loading performance\n\
            - SEO-friendly structure\n\
            \n\
            Sections to include:\n\
            {features}\n\
            \n\
            Additional requirements:\n\
            - Use engaging copy placeholders\n\
            - Include call-to-action buttons\n\
            - Add social proof elements\n\
            - Include contact/signup form\n",
        default_features: &[
            "Hero section with CTA",
            "Features section",
            "Footer with links",
        ],
        suggested_features: &[
            "Testimonials carousel",
            "Pricing table",
            "FAQ accordion",
            "Team section",
            "Newsletter signup",
        ],
    },
];

pub fn all_templates() -> &'static [ProjectTemplate] {
    TEMPLATES
}

pub fn get_template(id: &str) -> Option<&'static ProjectTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

/// Render the full requirement prompt for a template. Selected features
/// fall back to the template defaults; custom requirements are appended
/// at the end.
pub fn render_prompt(
    template: &ProjectTemplate,
    project_name: &str,
    selected_features: Option<&[String]>,
    custom_requirements: Option<&str>,
) -> String {
    let features: Vec<String> = match selected_features {
        Some(selected) if !selected.is_empty() => selected.to_vec(),
        _ => template.default_features.iter().map(|f| f.to_string()).collect(),
    };
    let features_text = features
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");

    let name = if project_name.is_empty() {
        "My Project"
    } else {
        project_name
    };

    let mut prompt = template
        .prompt_template
        .replace("{project_name}", name)
        .replace("{features}", &features_text);

    if let Some(custom) = custom_requirements {
        if !custom.is_empty() {
            prompt.push_str(&format!("\n\nAdditional User Requirements:\n{custom}"));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id() {
        assert!(get_template("react_app").is_some());
        assert!(get_template("no_such_template").is_none());
    }

    #[test]
    fn render_uses_defaults_when_no_features_selected() {
        let template = get_template("game").unwrap();
        let prompt = render_prompt(template, "Snake", None, None);
        assert!(prompt.contains("Project Name: Snake"));
        assert!(prompt.contains("- Core game mechanics"));
        assert!(!prompt.contains("{features}"));
    }

    #[test]
    fn render_with_selected_features_and_custom() {
        let template = get_template("react_app").unwrap();
        let features = vec!["Dark mode toggle".to_string()];
        let prompt = render_prompt(template, "Site", Some(&features), Some("use pnpm"));
        assert!(prompt.contains("- Dark mode toggle"));
        assert!(!prompt.contains("- Home page with hero section"));
        assert!(prompt.ends_with("Additional User Requirements:\nuse pnpm"));
    }

    #[test]
    fn empty_name_falls_back() {
        let template = get_template("landing_page").unwrap();
        let prompt = render_prompt(template, "", None, None);
        assert!(prompt.contains("Project Name: My Project"));
    }
}
